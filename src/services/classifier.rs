//! Client side of the external NSFW classifier.
//!
//! The model itself lives outside this service. `Classifier` is the narrow
//! interface the orchestrator needs; `HttpClassifier` talks to a model sidecar
//! over HTTP. Every call goes through `ClassifierPool`, which bounds how many
//! classifications run at once and gives up on calls that never return.

use crate::{config::ClassifierConfig, services::media_stager::StagedMedia};
use async_trait::async_trait;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};
use std::{future::Future, path::Path, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use url::Url;

/// Failures reported by the classifier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    /// The classifier refused the input (e.g. URL could not be fetched)
    #[error("{0}")]
    Rejected(String),

    /// The classifier could not tell what kind of media it was given
    #[error("{0}")]
    UnknownContentType(String),

    #[error("{0}")]
    Failed(String),

    #[error("classifier timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a still image on disk.
    async fn classify(
        &self,
        path: &Path,
        content_type: &str,
        batch_size: usize,
    ) -> Result<Value, ClassifierError>;

    /// Classify a video on disk; predictions are per frame or segment.
    async fn classify_video(
        &self,
        path: &Path,
        content_type: &str,
        batch_size: usize,
    ) -> Result<Value, ClassifierError>;

    /// Let the classifier fetch and classify a remote resource.
    async fn classify_url(&self, url: &Url) -> Result<Value, ClassifierError>;
}

/// Classifier reached over HTTP.
///
/// # Routes
///
/// - `POST {endpoint}/classify?batch_size=N` with the image bytes
/// - `POST {endpoint}/classify_video?batch_size=N` with the video bytes
/// - `POST {endpoint}/classify_url` with `{"url": "..."}`
///
/// 4xx answers are rejections (415 meaning an unknown content type),
/// anything else unsuccessful is a failure.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpClassifier {
    pub fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        // Url::join replaces the last path segment unless the base ends with '/'
        let mut base = endpoint.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: Url::parse(&base)?,
        })
    }

    fn route(&self, name: &str) -> Result<Url, ClassifierError> {
        self.endpoint
            .join(name)
            .map_err(|e| ClassifierError::Failed(format!("Invalid classifier route: {}", e)))
    }

    async fn post_file(
        &self,
        route: &str,
        path: &Path,
        content_type: &str,
        batch_size: usize,
    ) -> Result<Value, ClassifierError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| {
                ClassifierError::Failed(format!("Failed to read {}: {}", path.display(), e))
            })?;

        let response = self
            .client
            .post(self.route(route)?)
            .query(&[("batch_size", batch_size)])
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ClassifierError::Failed(format!("Classifier request failed: {}", e)))?;

        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, ClassifierError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| {
                    ClassifierError::Failed(format!("Invalid classifier response: {}", e))
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => ClassifierError::UnknownContentType(body),
            s if s.is_client_error() => ClassifierError::Rejected(body),
            s => ClassifierError::Failed(format!("Classifier returned {}: {}", s, body)),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        path: &Path,
        content_type: &str,
        batch_size: usize,
    ) -> Result<Value, ClassifierError> {
        self.post_file("classify", path, content_type, batch_size).await
    }

    async fn classify_video(
        &self,
        path: &Path,
        content_type: &str,
        batch_size: usize,
    ) -> Result<Value, ClassifierError> {
        self.post_file("classify_video", path, content_type, batch_size)
            .await
    }

    async fn classify_url(&self, url: &Url) -> Result<Value, ClassifierError> {
        let response = self
            .client
            .post(self.route("classify_url")?)
            .json(&json!({ "url": url.as_str() }))
            .send()
            .await
            .map_err(|e| ClassifierError::Failed(format!("Classifier request failed: {}", e)))?;

        Self::decode(response).await
    }
}

/// Bounded worker pool in front of a `Classifier`.
#[derive(Clone)]
pub struct ClassifierPool {
    classifier: Arc<dyn Classifier>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    batch_size: usize,
}

impl ClassifierPool {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ClassifierConfig) -> Self {
        Self {
            classifier,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Classify staged media, dispatching on image vs video.
    pub async fn classify_media(&self, media: &StagedMedia) -> Result<Value, ClassifierError> {
        let classifier = &self.classifier;
        let batch_size = self.batch_size;

        self.run(async move {
            let (path, content_type) = (media.path(), media.content_type());
            if media.is_video() {
                classifier.classify_video(path, content_type, batch_size).await
            } else {
                classifier.classify(path, content_type, batch_size).await
            }
        })
        .await
    }

    pub async fn classify_url(&self, url: &Url) -> Result<Value, ClassifierError> {
        let classifier = &self.classifier;
        self.run(async move { classifier.classify_url(url).await }).await
    }

    /// Wait for a worker slot, then run `call` under the timeout.
    async fn run<F>(&self, call: F) -> Result<Value, ClassifierError>
    where
        F: Future<Output = Result<Value, ClassifierError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClassifierError::Failed("Classifier pool is closed".to_string()))?;

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Classifier call exceeded {:?}", self.timeout);
                Err(ClassifierError::TimedOut(self.timeout))
            }
        }
    }
}
