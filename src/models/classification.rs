//! Classification data models and API request/response types.
//!
//! This module defines:
//! - `ClassificationResult`: memoised classifier output, keyed by content hash
//! - `ClassificationView`: what clients see for the bytes variant
//! - `SegmentScores`: normalised per-segment video predictions
//! - `ApiResponse`: the success envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a stored classification from the database.
///
/// # Database Table
///
/// Maps to the `classification_results` table. Rows are append-only:
/// the same hash may appear more than once after a concurrent miss, and
/// lookups always return the oldest match.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClassificationResult {
    /// Internal identifier, never returned to clients
    pub id: Uuid,

    /// Perceptual hash of the final staged media (hex)
    pub hash: String,

    /// Effective content type the classifier saw (GIFs are stored as `video/mp4`)
    pub content_type: String,

    /// Classifier output, normalised for video
    pub data: serde_json::Value,

    /// Name of the staged temp file. Diagnostic only; the file is gone by the
    /// time anyone reads this.
    pub path: String,

    pub created_at: DateTime<Utc>,
}

impl ClassificationResult {
    pub fn new(hash: String, content_type: String, data: serde_json::Value, path: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            hash,
            content_type,
            data,
            path,
            created_at: Utc::now(),
        }
    }
}

/// Response body for the bytes variant of the classify endpoint.
///
/// # JSON Example
///
/// ```json
/// {
///   "data": { "/tmp/nsfw-a1b2.png": { "safe": 0.98, "unsafe": 0.02 } },
///   "path": "/tmp/nsfw-a1b2.png",
///   "contentType": "image/png",
///   "hash": "ffffffffffffffff"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationView {
    pub data: serde_json::Value,
    pub path: String,
    pub content_type: String,
    pub hash: String,
}

/// Convert a stored result into the client view.
///
/// Drops the internal `id` and `created_at` fields.
impl From<ClassificationResult> for ClassificationView {
    fn from(result: ClassificationResult) -> Self {
        Self {
            data: result.data,
            path: result.path,
            content_type: result.content_type,
            hash: result.hash,
        }
    }
}

/// Safe/unsafe confidence for one video frame or segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SegmentScores {
    pub safe: f64,

    #[serde(rename = "unsafe")]
    pub unsafe_score: f64,
}

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: u16,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { status: 200, data }
    }
}
