//! API key authentication stage.
//!
//! This stage runs first in every protected pipeline to:
//! 1. Remove the credential field (default `__key__`) from the JSON body
//! 2. Check it against the cached set of active keys
//! 3. Reject the request with HTTP 401 before any other stage sees it
//!
//! The credential is stripped from the body even when it is valid, so later
//! stages and handlers never see it.

use crate::{
    error::AppError,
    middleware::pipeline::{Interceptor, RequestContext},
    services::key_store::KeyStore,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Authentication stage backed by the shared `KeyStore`.
pub struct ApiKeyAuth {
    keys: Arc<KeyStore>,

    /// Name of the JSON body field holding the key
    field: String,
}

impl ApiKeyAuth {
    pub fn new(keys: Arc<KeyStore>, field: impl Into<String>) -> Self {
        Self {
            keys,
            field: field.into(),
        }
    }
}

#[async_trait]
impl Interceptor for ApiKeyAuth {
    fn name(&self) -> &'static str {
        "auth"
    }

    /// # Flow
    ///
    /// 1. Take the credential out of the body (missing or non-string → 401)
    /// 2. `KeyStore::is_valid` (refreshes the cache if it is stale)
    /// 3. Unknown or revoked key → 401
    async fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let credential = ctx.take_field(&self.field).ok_or(AppError::Unauthorized)?;
        let key = credential
            .as_str()
            .filter(|k| !k.is_empty())
            .ok_or(AppError::Unauthorized)?;

        if self.keys.is_valid(key).await? {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AuthConfig, test_utils::InMemoryApiKeyRepo};
    use serde_json::json;

    async fn auth_with_key() -> (ApiKeyAuth, String) {
        let store = Arc::new(KeyStore::new(
            Arc::new(InMemoryApiKeyRepo::new()),
            &AuthConfig::default(),
        ));
        let key = store.generate_key().await.unwrap();
        (ApiKeyAuth::new(store, "__key__"), key)
    }

    #[tokio::test]
    async fn valid_key_passes_and_is_stripped() {
        let (auth, key) = auth_with_key().await;
        let mut ctx = RequestContext::new(json!({"__key__": key, "url": "u"}), None);

        auth.intercept(&mut ctx).await.unwrap();

        assert_eq!(ctx.body, json!({"url": "u"}));
    }

    #[tokio::test]
    async fn missing_wrong_or_malformed_key_is_unauthorized() {
        let (auth, _key) = auth_with_key().await;

        for body in [
            json!({"url": "u"}),
            json!({"__key__": "not-a-key"}),
            json!({"__key__": 123}),
            json!({"__key__": ""}),
            json!(null),
        ] {
            let mut ctx = RequestContext::new(body, None);
            assert!(matches!(
                auth.intercept(&mut ctx).await,
                Err(AppError::Unauthorized)
            ));
        }
    }
}
