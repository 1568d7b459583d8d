//! Router assembly.
//!
//! Protected routes each get their own `Pipeline` of guards; public routes
//! (`/health`) get none. Everything shares one `AppState`.

use crate::{
    config::RateLimitConfig,
    handlers,
    middleware::{
        auth::ApiKeyAuth,
        pipeline::{Pipeline, pipeline_middleware},
        rate_limit::{LimitKey, RateLimitPolicy},
        validation::{SchemaCheck, classify_schema},
    },
    services::{
        classification_service::ClassificationService, key_store::KeyStore,
        result_cache::ResultStore,
    },
};
use axum::{Router, middleware as axum_middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Body field clients use to choose their rate limiting identity.
pub const CLASSIFY_LIMIT_FIELD: &str = "ratelimitKey";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub classification: Arc<ClassificationService>,
    pub results: Arc<dyn ResultStore>,
}

/// Everything the protected routes' pipelines are built from.
pub struct Guards {
    pub keys: Arc<KeyStore>,

    /// Body field holding the API key
    pub key_field: String,

    pub classify_limit: Arc<RateLimitPolicy>,
    pub max_body_bytes: usize,
    pub trust_proxy_headers: bool,
}

/// Rate limit policy for the classify route, keyed by `ratelimitKey`.
///
/// `classify_per_second` must be positive.
pub fn classify_rate_limit(config: &RateLimitConfig) -> RateLimitPolicy {
    RateLimitPolicy::new(
        config.classify_per_second,
        LimitKey::ByField(CLASSIFY_LIMIT_FIELD.to_string()),
    )
    .with_eviction_factor(config.eviction_factor)
}

/// Build the HTTP router.
///
/// # Routes
///
/// - `GET /health` (public)
/// - `GET /nsfw_detection/classify`: auth → rate limit → schema check → handler
pub fn build_router(state: AppState, guards: Guards) -> Router {
    let classify_pipeline = Pipeline::new(guards.max_body_bytes)
        .trust_proxy_headers(guards.trust_proxy_headers)
        .with(Arc::new(ApiKeyAuth::new(guards.keys, guards.key_field)))
        .with(guards.classify_limit)
        .with(Arc::new(SchemaCheck::new(classify_schema())));

    let protected_routes = Router::new()
        .route(
            "/nsfw_detection/classify",
            get(handlers::classify::classify),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            classify_pipeline,
            pipeline_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
