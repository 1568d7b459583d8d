//! Test utilities.
//!
//! This module provides:
//! - In-memory implementations of the persistence traits
//! - Stub transcoder, hasher and classifier for driving the pipeline without
//!   ffmpeg or a model
//! - Small fixture factories
//! - `TestApp`: the real router over in-memory state, behind an axum-test server

use crate::{
    app::{AppState, Guards, build_router, classify_rate_limit},
    config::{AuthConfig, ClassifierConfig, MediaConfig, RateLimitConfig},
    error::AppError,
    models::{api_key::ApiKey, classification::ClassificationResult},
    services::{
        classification_service::ClassificationService,
        classifier::{Classifier, ClassifierError, ClassifierPool},
        content_hasher::{MediaHasher, PerceptualHasher},
        ffmpeg::{Ffmpeg, Transcoder},
        key_store::{ApiKeyRepo, KeyStore},
        media_stager::{MediaStager, StagedMedia},
        result_cache::ResultStore,
    },
};
use async_trait::async_trait;
use axum_test::TestServer;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;
use url::Url;

/// In-memory implementation of ApiKeyRepo for testing.
#[derive(Default)]
pub struct InMemoryApiKeyRepo {
    keys: Mutex<Vec<ApiKey>>,
    list_calls: AtomicUsize,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryApiKeyRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.keys.lock().iter().filter(|k| k.is_active).count()
    }

    /// How many times the key set was read (for refresh assertions).
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// The next `list_active` takes its snapshot, then waits for the returned
    /// `Notify` before answering.
    pub fn hold_next_list(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.hold.lock() = Some(release.clone());
        release
    }
}

#[async_trait]
impl ApiKeyRepo for InMemoryApiKeyRepo {
    async fn list_active(&self) -> Result<Vec<ApiKey>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot: Vec<ApiKey> = self
            .keys
            .lock()
            .iter()
            .filter(|k| k.is_active)
            .cloned()
            .collect();

        let hold = self.hold.lock().take();
        if let Some(release) = hold {
            release.notified().await;
        }
        Ok(snapshot)
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), AppError> {
        self.keys.lock().push(key.clone());
        Ok(())
    }

    async fn deactivate(&self, key_hash: &str) -> Result<bool, AppError> {
        let mut keys = self.keys.lock();
        match keys.iter_mut().find(|k| k.is_active && k.key_hash == key_hash) {
            Some(key) => {
                key.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory implementation of ResultStore; rows are kept in insertion order.
#[derive(Default)]
pub struct InMemoryResultStore {
    rows: Mutex<Vec<ClassificationResult>>,
    fail_writes: AtomicBool,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Make every subsequent `store` fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn lookup(&self, hash: &str) -> Result<Option<ClassificationResult>, AppError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|r| r.hash == hash)
            .cloned())
    }

    async fn store(&self, result: &ClassificationResult) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.rows.lock().push(result.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Transcoder that copies the input instead of running ffmpeg.
pub struct StubTranscoder {
    fail: bool,
}

impl StubTranscoder {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn gif_to_mp4(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::Transcode("ffmpeg exited with 1".to_string()));
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| AppError::Transcode(e.to_string()))?;
        Ok(())
    }
}

/// Hasher over the raw file bytes (first 16 hex chars of SHA-256).
pub struct StubHasher;

#[async_trait]
impl MediaHasher for StubHasher {
    async fn hash(&self, media: &StagedMedia) -> Result<String, AppError> {
        let bytes = tokio::fs::read(media.path())
            .await
            .map_err(|e| AppError::Classification(e.to_string()))?;
        let digest = hex::encode(Sha256::digest(&bytes));
        Ok(digest[..16].to_string())
    }
}

/// Classifier double that records what it was asked to classify.
pub struct StubClassifier {
    response: Value,
    failure: Option<ClassifierError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<(PathBuf, String)>>,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self {
            response: json!({ "safe": 0.98, "unsafe": 0.02 }),
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `ClassifierError::Failed(msg)`.
    pub fn failing(msg: &str) -> Self {
        Self {
            failure: Some(ClassifierError::Failed(msg.to_string())),
            ..Self::new()
        }
    }

    /// Every call is refused as bad input.
    pub fn rejecting(msg: &str) -> Self {
        Self {
            failure: Some(ClassifierError::Rejected(msg.to_string())),
            ..Self::new()
        }
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.seen.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn content_types(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    async fn answer(&self, seen: Option<(PathBuf, String)>) -> Result<Value, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(seen) = seen {
            self.seen.lock().push(seen);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.response.clone()),
        }
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(
        &self,
        path: &Path,
        content_type: &str,
        _batch_size: usize,
    ) -> Result<Value, ClassifierError> {
        self.answer(Some((path.to_path_buf(), content_type.to_string())))
            .await
    }

    async fn classify_video(
        &self,
        path: &Path,
        content_type: &str,
        _batch_size: usize,
    ) -> Result<Value, ClassifierError> {
        self.answer(Some((path.to_path_buf(), content_type.to_string())))
            .await
    }

    async fn classify_url(&self, _url: &Url) -> Result<Value, ClassifierError> {
        self.answer(None).await
    }
}

/// Encode a white `width` x `height` PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}

/// The full router wired to in-memory repositories and a stub classifier.
///
/// Images are hashed for real; GIFs are "transcoded" by copying.
pub struct TestApp {
    pub server: TestServer,
    pub keys: Arc<KeyStore>,

    /// A valid API key
    pub key: String,

    pub classifier: Arc<StubClassifier>,
    pub results: Arc<InMemoryResultStore>,
    staging: tempfile::TempDir,
}

impl TestApp {
    pub async fn spawn(classifier: StubClassifier) -> Self {
        Self::spawn_with_body_limit(classifier, MediaConfig::default().max_body_bytes).await
    }

    pub async fn spawn_with_body_limit(classifier: StubClassifier, max_body_bytes: usize) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let staging_dir = Some(staging.path().to_path_buf());
        let classifier = Arc::new(classifier);
        let results = Arc::new(InMemoryResultStore::new());

        let auth = AuthConfig::default();
        let keys = Arc::new(KeyStore::new(Arc::new(InMemoryApiKeyRepo::new()), &auth));
        let key = keys.generate_key().await.unwrap();

        let service = ClassificationService::new(
            MediaStager::new(staging_dir.clone(), Arc::new(StubTranscoder::ok())),
            Arc::new(PerceptualHasher::new(
                Ffmpeg::new(&MediaConfig::default()),
                staging_dir,
            )),
            results.clone(),
            ClassifierPool::new(classifier.clone(), &ClassifierConfig::default()),
        );

        let state = AppState {
            classification: Arc::new(service),
            results: results.clone(),
        };
        let guards = Guards {
            keys: keys.clone(),
            key_field: auth.key_field,
            classify_limit: Arc::new(classify_rate_limit(&RateLimitConfig::default())),
            max_body_bytes,
            trust_proxy_headers: false,
        };

        Self {
            server: TestServer::new(build_router(state, guards)).unwrap(),
            keys,
            key,
            classifier,
            results,
            staging,
        }
    }

    /// Files currently left in the staging directory.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}
