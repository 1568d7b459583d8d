//! Data models representing database entities and API payloads.

/// API key authentication model
pub mod api_key;
/// Classification results and response shapes
pub mod classification;
