//! Ordered request interceptor pipeline.
//!
//! Every protected route is registered with its own `Pipeline`: a list of
//! interceptors run in order against the buffered JSON body. Each stage either
//! lets the request continue (`Ok(())`) or ends it with an `AppError`, which
//! becomes the response. Only when every stage passes does the handler run.
//!
//! # Flow
//!
//! 1. Buffer the body (bounded by the configured size limit)
//! 2. Parse it as JSON; an empty or non-JSON body becomes `null`
//! 3. Run each interceptor in registration order
//! 4. Insert the (possibly modified) body into request extensions as `RequestBody`
//! 5. Call the handler

use crate::error::AppError;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};

/// Per-request data shared by every interceptor.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// JSON request body; interceptors may remove fields (e.g. the credential)
    pub body: Value,

    /// Client address, if known
    pub remote_addr: Option<String>,
}

impl RequestContext {
    pub fn new(body: Value, remote_addr: Option<String>) -> Self {
        Self { body, remote_addr }
    }

    /// Look up a top-level body field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|map| map.get(name))
    }

    /// Remove and return a top-level body field.
    pub fn take_field(&mut self, name: &str) -> Option<Value> {
        self.body.as_object_mut().and_then(|map| map.remove(name))
    }
}

/// The validated JSON body, handed to route handlers through request extensions.
#[derive(Debug, Clone)]
pub struct RequestBody(pub Value);

/// One stage of a route's middleware pipeline.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect (and optionally modify) the request.
    ///
    /// Returning an error short-circuits the pipeline.
    async fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AppError>;
}

/// An ordered list of interceptors, composed at route registration time.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Interceptor>>,
    body_limit: usize,
    trust_proxy_headers: bool,
}

impl Pipeline {
    pub fn new(body_limit: usize) -> Self {
        Self {
            stages: Vec::new(),
            body_limit,
            trust_proxy_headers: false,
        }
    }

    /// Append a stage. Stages run in the order they are added.
    pub fn with(mut self, stage: Arc<dyn Interceptor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Run every stage against `ctx`, stopping at the first rejection.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        for stage in &self.stages {
            if let Err(e) = stage.intercept(ctx).await {
                tracing::debug!("Request rejected by {}: {}", stage.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn remote_addr(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        if self.trust_proxy_headers {
            let forwarded = headers
                .get("X-Forwarded-For")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                return Some(ip.to_string());
            }
        }
        peer.map(|addr| addr.ip().to_string())
    }
}

/// Axum middleware that drives a route's `Pipeline`.
///
/// Registered with `from_fn_with_state(pipeline, pipeline_middleware)`.
pub async fn pipeline_middleware(
    State(pipeline): State<Pipeline>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();

    // Step 1: Buffer the body
    let bytes = axum::body::to_bytes(body, pipeline.body_limit)
        .await
        .map_err(|_| AppError::PayloadTooLarge)?;

    // Step 2: Parse JSON; anything unparsable carries no credential and fails auth
    let body = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let remote_addr = pipeline.remote_addr(&parts.headers, peer);

    // Step 3: Run interceptors in order
    let mut ctx = RequestContext::new(body, remote_addr);
    pipeline.run(&mut ctx).await?;

    // Step 4: Hand the body to the handler
    parts.extensions.insert(RequestBody(ctx.body));

    Ok(next.run(Request::from_parts(parts, Body::empty())).await)
}
