//! API key store with a refresh-bounded in-memory cache.
//!
//! The set of active key hashes is re-read from the repository at most once per
//! refresh interval. Lookups inside the interval may see a slightly stale set;
//! that staleness is bounded by the interval.
//!
//! # Concurrency
//!
//! The cache lock is never held while the repository is queried. Two requests
//! may refresh at the same time; each installs a complete snapshot, so the
//! cache always converges to a consistent set.

use crate::{config::AuthConfig, db::DbPool, error::AppError, models::api_key::ApiKey};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;

/// Persistence for API keys.
#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    /// Every key with `is_active = true`.
    async fn list_active(&self) -> Result<Vec<ApiKey>, AppError>;

    async fn insert(&self, key: &ApiKey) -> Result<(), AppError>;

    /// Set `is_active = false` on an active key. Returns false if no active key matched.
    async fn deactivate(&self, key_hash: &str) -> Result<bool, AppError>;
}

/// PostgreSQL-backed key repository (`api_keys` table).
#[derive(Clone)]
pub struct PgApiKeyRepo {
    pool: DbPool,
}

impl PgApiKeyRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepo for PgApiKeyRepo {
    async fn list_active(&self) -> Result<Vec<ApiKey>, AppError> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT id, key_hash, created_at, is_active FROM api_keys WHERE is_active = true",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, key_hash, created_at, is_active)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(key.id)
        .bind(&key.key_hash)
        .bind(key.created_at)
        .bind(key.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate(&self, key_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE api_keys SET is_active = false WHERE key_hash = $1 AND is_active = true",
        )
        .bind(key_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Hash a plaintext key the way it is stored.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct KeyCache {
    keys: HashSet<String>,
    last_refreshed_at: Option<Instant>,

    /// Ticket of the refresh that installed `keys`
    generation: u64,
}

/// Process-wide view of the active API keys.
pub struct KeyStore {
    repo: Arc<dyn ApiKeyRepo>,
    refresh_interval: Duration,
    key_length: usize,
    alphabet: Vec<char>,
    cache: RwLock<KeyCache>,

    /// Handed out to each refresh before it reads the repository
    next_generation: AtomicU64,
}

impl KeyStore {
    /// # Panics
    ///
    /// Panics if `refresh_interval_secs` is not a valid `Duration`; `Config::load`
    /// rejects such values.
    pub fn new(repo: Arc<dyn ApiKeyRepo>, config: &AuthConfig) -> Self {
        let mut alphabet: Vec<char> = config.key_alphabet.chars().collect();
        if alphabet.is_empty() {
            alphabet = AuthConfig::default().key_alphabet.chars().collect();
        }

        Self {
            repo,
            refresh_interval: Duration::from_secs_f64(config.refresh_interval_secs),
            key_length: config.key_length.max(1),
            alphabet,
            cache: RwLock::new(KeyCache::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Reload the active key set if the cache is older than the refresh interval.
    ///
    /// `force` reloads regardless of age. A refresh that started before the
    /// currently installed one never overwrites it, so a snapshot read before a
    /// revocation cannot resurrect the revoked key.
    pub async fn refresh(&self, force: bool) -> Result<(), AppError> {
        if !force && !self.is_stale(Instant::now()) {
            return Ok(());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let keys: HashSet<String> = self
            .repo
            .list_active()
            .await?
            .into_iter()
            .filter(|k| k.is_active)
            .map(|k| k.key_hash)
            .collect();

        let mut cache = self.cache.write();
        if cache.generation > generation {
            tracing::debug!("Discarded API key snapshot superseded by a newer refresh");
            return Ok(());
        }
        tracing::debug!("Refreshed API key cache ({} active keys)", keys.len());
        cache.keys = keys;
        cache.last_refreshed_at = Some(Instant::now());
        cache.generation = generation;
        Ok(())
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.cache.read().last_refreshed_at {
            Some(at) => now.saturating_duration_since(at) >= self.refresh_interval,
            None => true,
        }
    }

    /// True if `key` belongs to an active API key.
    pub async fn is_valid(&self, key: &str) -> Result<bool, AppError> {
        self.refresh(false).await?;
        let hashed = hash_key(key);
        Ok(self.cache.read().keys.contains(&hashed))
    }

    /// Create and persist a new active key, returning its plaintext.
    ///
    /// The plaintext is not stored anywhere; this is the only time it is visible.
    pub async fn generate_key(&self) -> Result<String, AppError> {
        let key = self.random_key();
        self.repo.insert(&ApiKey::new_active(hash_key(&key))).await?;
        tracing::info!("Generated a new API key");
        Ok(key)
    }

    /// Deactivate `key`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if no active key matches.
    pub async fn revoke_key(&self, key: &str) -> Result<(), AppError> {
        if !self.repo.deactivate(&hash_key(key)).await? {
            return Err(AppError::KeyNotFound(key.to_string()));
        }

        // Make the revocation visible to this process right away
        self.refresh(true).await?;
        tracing::info!("Revoked an API key");
        Ok(())
    }

    fn random_key(&self) -> String {
        let mut rng = rand::rng();
        (0..self.key_length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect()
    }
}
