//! Business logic services.
//!
//! Services hold the classification pipeline and the API key store, separated
//! from HTTP handlers. External systems (database, ffmpeg, the classifier) sit
//! behind traits so the pipeline can be exercised without them.

pub mod classification_service;
pub mod classifier;
pub mod content_hasher;
pub mod ffmpeg;
pub mod key_store;
pub mod media_stager;
pub mod result_cache;
