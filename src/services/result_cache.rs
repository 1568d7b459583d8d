//! Persistent memo of classification results, keyed by content hash.
//!
//! Insert-only: results are never updated or deleted. Uniqueness of `hash` is
//! not enforced; when two concurrent misses both store, lookups keep returning
//! the oldest row.

use crate::{db::DbPool, error::AppError, models::classification::ClassificationResult};
use async_trait::async_trait;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Oldest stored result for `hash`, if any.
    async fn lookup(&self, hash: &str) -> Result<Option<ClassificationResult>, AppError>;

    async fn store(&self, result: &ClassificationResult) -> Result<(), AppError>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<(), AppError>;
}

/// PostgreSQL-backed store (`classification_results` table).
#[derive(Clone)]
pub struct PgResultStore {
    pool: DbPool,
}

impl PgResultStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn lookup(&self, hash: &str) -> Result<Option<ClassificationResult>, AppError> {
        let result = sqlx::query_as::<_, ClassificationResult>(
            r#"
            SELECT id, hash, content_type, data, path, created_at
            FROM classification_results
            WHERE hash = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn store(&self, result: &ClassificationResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO classification_results (id, hash, content_type, data, path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(result.id)
        .bind(&result.hash)
        .bind(&result.content_type)
        .bind(&result.data)
        .bind(&result.path)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
