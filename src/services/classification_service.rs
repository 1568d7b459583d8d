//! Classification orchestration.
//!
//! This module ties the per-request pieces together for the classify route.
//!
//! # Bytes Flow
//!
//! 1. Stage the bytes on disk (GIFs become MP4)
//! 2. Hash the final staged file
//! 3. Return the stored result if the hash is already known
//! 4. Otherwise classify through the worker pool
//! 5. Normalise video predictions
//! 6. Store the result (a failed store is logged, not returned)
//! 7. Drop the staged media, deleting its temp files
//!
//! # URL Flow
//!
//! The URL is checked locally, then handed to the classifier, which fetches it
//! itself. URL results are not cached.

use crate::{
    error::AppError,
    middleware::validation::{coerce_f64, segment_schema, validate},
    models::classification::{ClassificationResult, ClassificationView, SegmentScores},
    services::{
        classifier::{ClassifierError, ClassifierPool},
        content_hasher::MediaHasher,
        media_stager::MediaStager,
        result_cache::ResultStore,
    },
};
use serde_json::{Map, Value};
use std::sync::Arc;
use url::Url;

pub struct ClassificationService {
    stager: MediaStager,
    hasher: Arc<dyn MediaHasher>,
    results: Arc<dyn ResultStore>,
    classifier: ClassifierPool,
}

impl ClassificationService {
    pub fn new(
        stager: MediaStager,
        hasher: Arc<dyn MediaHasher>,
        results: Arc<dyn ResultStore>,
        classifier: ClassifierPool,
    ) -> Self {
        Self {
            stager,
            hasher,
            results,
            classifier,
        }
    }

    /// Classify submitted media, reusing a stored result for identical content.
    ///
    /// # Errors
    ///
    /// - `UnknownContentType`: content type is not an image or video
    /// - `Staging` / `Transcode`: media could not be prepared
    /// - `Classification`: hashing or the classifier failed (nothing is stored)
    /// - `Database`: the cache lookup failed
    pub async fn classify_bytes(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ClassificationView, AppError> {
        // Owns the temp files until the end of this function
        let media = self.stager.stage(bytes, content_type).await?;

        let hash = self.hasher.hash(&media).await?;

        if let Some(stored) = self.results.lookup(&hash).await? {
            tracing::debug!("Cache hit for {}", hash);
            return Ok(stored.into());
        }
        tracing::debug!("Cache miss for {}", hash);

        let predictions = self
            .classifier
            .classify_media(&media)
            .await
            .map_err(|e| {
                tracing::error!("Classification of {} failed: {}", media.original_path(), e);
                AppError::Classification(e.to_string())
            })?;

        let data = if media.is_video() {
            normalize_video_predictions(predictions)
        } else {
            predictions
        };

        let result = ClassificationResult::new(
            hash,
            media.content_type().to_string(),
            data,
            media.original_path().to_string(),
        );

        if let Err(e) = self.results.store(&result).await {
            tracing::warn!("Failed to cache result for {}: {}", result.hash, e);
        }

        Ok(result.into())
    }

    /// Classify a remote resource by URL.
    ///
    /// # Errors
    ///
    /// - `Validation`: `url is required` / `invalid url`
    /// - `ClassifierRejected` / `UnknownContentType`: the classifier refused the resource
    /// - `Classification`: any other classifier failure
    pub async fn classify_url(&self, url: Option<&str>) -> Result<Value, AppError> {
        let url = parse_url(url)?;

        self.classifier.classify_url(&url).await.map_err(|e| match e {
            ClassifierError::Rejected(msg) => AppError::ClassifierRejected(msg),
            ClassifierError::UnknownContentType(msg) => AppError::UnknownContentType(msg),
            other => {
                tracing::error!("Classification of {} failed: {}", url, other);
                AppError::Classification(other.to_string())
            }
        })
    }
}

/// Check a client-supplied URL: present, absolute, http(s), with a host.
fn parse_url(raw: Option<&str>) -> Result<Url, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("url is required".to_string()))?;

    let invalid = || AppError::Validation("invalid url".to_string());
    let url = Url::parse(raw).map_err(|_| invalid())?;

    let web_scheme = matches!(url.scheme(), "http" | "https");
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    if !web_scheme || !has_host {
        return Err(invalid());
    }

    Ok(url)
}

/// Coerce video predictions into `segment -> {safe, unsafe}`.
///
/// Predictions may sit at the top level or under `preds`. Segments whose scores
/// are not float-coercible are dropped.
pub fn normalize_video_predictions(raw: Value) -> Value {
    let segments = match raw {
        Value::Object(mut map) => match map.remove("preds") {
            Some(Value::Object(preds)) => preds,
            Some(other) => {
                map.insert("preds".to_string(), other);
                map
            }
            None => map,
        },
        _ => Map::new(),
    };

    let shape = segment_schema();
    let normalized: Map<String, Value> = segments
        .into_iter()
        .filter(|(_, scores)| validate(&shape, scores))
        .filter_map(|(segment, scores)| {
            let safe = scores.get("safe").and_then(coerce_f64)?;
            let unsafe_score = scores.get("unsafe").and_then(coerce_f64)?;
            let scores = serde_json::to_value(SegmentScores { safe, unsafe_score }).ok()?;
            Some((segment, scores))
        })
        .collect();

    Value::Object(normalized)
}
