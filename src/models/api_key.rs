//! API Key model for authentication.
//!
//! API keys authenticate callers of the classification endpoint. They are
//! stored in the database as SHA-256 hashes; the plaintext is only ever shown
//! once, when the key is generated.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `created_at`: When the key was created
/// - `is_active`: Whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for this API key
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    pub key_hash: String,

    /// Timestamp when this API key was created
    pub created_at: DateTime<Utc>,

    /// Whether this API key is currently active
    ///
    /// Inactive keys are rejected during authentication. Keys are never deleted, only deactivated.
    pub is_active: bool,
}

impl ApiKey {
    /// Build a fresh, active key record for the given hash.
    pub fn new_active(key_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_hash,
            created_at: Utc::now(),
            is_active: true,
        }
    }
}
