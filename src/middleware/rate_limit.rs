//! Per-key request rate limiting.
//!
//! Each policy remembers when every limiting key was last seen and rejects a
//! request that arrives sooner than `1 / max_per_second` after the previous
//! one for the same key. The timestamp is recorded even when the request is
//! rejected, so a client hammering the endpoint stays limited.
//!
//! Policies are independent: two routes never share a window.

use crate::{
    error::AppError,
    middleware::{
        pipeline::{Interceptor, RequestContext},
        validation::coerce_string,
    },
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};

/// Key used when neither the request nor the connection identifies the caller.
const UNKNOWN_CLIENT: &str = "unknown";

/// How the limiting key is derived from a request.
#[derive(Clone)]
pub enum LimitKey {
    /// A string-coercible body field; falls back to the remote address when
    /// the field is missing or not coercible.
    ByField(String),
    ByRemoteAddress,
    /// Caller-supplied extraction; `None` falls back to the remote address.
    Custom(Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKey::ByField(name) => f.debug_tuple("ByField").field(name).finish(),
            LimitKey::ByRemoteAddress => f.write_str("ByRemoteAddress"),
            LimitKey::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl LimitKey {
    /// Resolve the limiting key for a request.
    pub fn resolve(&self, ctx: &RequestContext) -> String {
        let preferred = match self {
            LimitKey::ByField(name) => ctx.field(name).and_then(coerce_string),
            LimitKey::ByRemoteAddress => None,
            LimitKey::Custom(extract) => extract(ctx),
        };

        preferred
            .or_else(|| ctx.remote_addr.clone())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// A rate limit attached to one route.
#[derive(Debug)]
pub struct RateLimitPolicy {
    window: Duration,
    key: LimitKey,
    eviction_factor: u32,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl RateLimitPolicy {
    /// Allow `max_per_second` requests per second per limiting key.
    ///
    /// # Panics
    ///
    /// Panics if `max_per_second` is not a positive finite number.
    pub fn new(max_per_second: f64, key: LimitKey) -> Self {
        assert!(
            max_per_second.is_finite() && max_per_second > 0.0,
            "max_per_second must be positive"
        );
        Self {
            window: Duration::from_secs_f64(1.0 / max_per_second),
            key,
            eviction_factor: 10,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_eviction_factor(mut self, factor: u32) -> Self {
        self.eviction_factor = factor.max(1);
        self
    }

    /// Record a request for `key` at `now`; returns true if it may proceed.
    ///
    /// The read of the previous timestamp and the write of `now` happen under
    /// one lock, so two concurrent requests for the same key cannot both pass.
    pub fn check(&self, key: &str, now: Instant) -> bool {
        let previous = self.last_seen.lock().insert(key.to_string(), now);

        match previous {
            Some(prev) => now.saturating_duration_since(prev) >= self.window,
            None => true,
        }
    }

    /// Drop keys idle for longer than `eviction_factor` windows.
    ///
    /// Returns the number of evicted keys.
    pub fn sweep(&self, now: Instant) -> usize {
        let max_idle = self.window * self.eviction_factor;
        let mut last_seen = self.last_seen.lock();
        let before = last_seen.len();
        last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < max_idle);
        before - last_seen.len()
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.last_seen.lock().len()
    }

    /// Spawn a background task sweeping this policy every `every`.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = policy.sweep(Instant::now());
                if evicted > 0 {
                    tracing::debug!("Evicted {} idle rate limit keys", evicted);
                }
            }
        })
    }
}

#[async_trait]
impl Interceptor for RateLimitPolicy {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let key = self.key.resolve(ctx);

        if self.check(&key, Instant::now()) {
            Ok(())
        } else {
            tracing::info!("Rate limited request for key {}", key);
            Err(AppError::RateLimited)
        }
    }
}
