//! NSFW Screening Service - Main Application Entry Point
//!
//! An HTTP API that classifies images and videos as safe or unsafe. Callers
//! authenticate with an API key in the JSON body, are rate limited per
//! `ratelimitKey`, and get results memoised by perceptual content hash.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (API keys, cached results)
//! - **Media**: ffmpeg subprocesses for GIF transcoding and frame sampling
//! - **Classifier**: external model sidecar reached over HTTP
//!
//! # Startup Flow
//!
//! 1. Parse flags and load configuration
//! 2. Create database connection pool and run migrations
//! 3. Generate or revoke API keys if asked
//! 4. Build the classification pipeline and HTTP router
//! 5. Start server on configured address

mod app;
mod cli;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
#[cfg(test)]
mod test_utils;

use clap::Parser;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use crate::{
    app::{AppState, Guards},
    services::{
        classification_service::ClassificationService,
        classifier::{ClassifierPool, HttpClassifier},
        content_hasher::PerceptualHasher,
        ffmpeg::Ffmpeg,
        key_store::{KeyStore, PgApiKeyRepo},
        media_stager::MediaStager,
        result_cache::PgResultStore,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber.
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = cli::Cli::parse();

    // Load configuration
    let mut config = config::Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let keys = Arc::new(KeyStore::new(
        Arc::new(PgApiKeyRepo::new(pool.clone())),
        &config.auth,
    ));

    // Key management
    if cli.generate_key {
        let key = keys.generate_key().await?;
        tracing::info!("Generated API key: {}", key);
    }
    if let Some(key) = cli.revoke_key.as_deref() {
        keys.revoke_key(key).await?;
        tracing::info!("Revoked API key");
    }
    if cli.no_serve {
        return Ok(());
    }

    // Classification pipeline
    let ffmpeg = Ffmpeg::new(&config.media);
    let staging_dir = config.media.staging_dir.clone();
    let results = Arc::new(PgResultStore::new(pool));
    let classifier = HttpClassifier::new(&config.classifier.endpoint)?;

    let classification = ClassificationService::new(
        MediaStager::new(staging_dir.clone(), Arc::new(ffmpeg.clone())),
        Arc::new(PerceptualHasher::new(ffmpeg, staging_dir)),
        results.clone(),
        ClassifierPool::new(Arc::new(classifier), &config.classifier),
    );

    // Rate limit windows, swept in the background
    let classify_limit = Arc::new(app::classify_rate_limit(&config.rate_limit));
    classify_limit.spawn_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)));

    let state = AppState {
        classification: Arc::new(classification),
        results,
    };
    let guards = Guards {
        keys,
        key_field: config.auth.key_field.clone(),
        classify_limit,
        max_body_bytes: config.media.max_body_bytes,
        trust_proxy_headers: config.server.trust_proxy_headers,
    };
    let app = app::build_router(state, guards);

    // Bind to network address and start server
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connection info feeds the rate limiter's remote-address fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
