//! HTTP middleware components.
//!
//! Protected routes run an explicit, ordered pipeline of interceptors before
//! the handler. Each interceptor can:
//! - Authenticate the request
//! - Rate limit it
//! - Validate the body shape
//! - Short-circuit with an error response

/// API key authentication stage
pub mod auth;
/// Interceptor trait and the axum middleware driving it
pub mod pipeline;
/// Per-key rate limiting stage
pub mod rate_limit;
/// Request shape validation stage
pub mod validation;
