use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use jobbox_core::types::{format_timestamp, InsertResult, UserDocument};

use crate::is_unavailable;

/// Repository for the users collection.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores a user document. Email uniqueness is not enforced.
    pub async fn insert(
        &self,
        user: &UserDocument,
        now: DateTime<Utc>,
    ) -> Result<InsertResult, UserError> {
        let document = serde_json::to_string(user)?;
        sqlx::query("INSERT INTO users (id, email, document, created_at) VALUES (?, ?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(document)
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;

        Ok(InsertResult::new(user.id))
    }

    /// Returns the earliest stored user with the given email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserDocument>, UserError> {
        let row = sqlx::query(
            "SELECT document FROM users WHERE email = ? ORDER BY created_at ASC, rowid ASC LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document: &str = row.try_get("document")?;
        Ok(Some(serde_json::from_str(document)?))
    }
}

/// Errors raised by the users repository.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("failed to encode or decode user document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl UserError {
    /// Returns `true` when the store itself could not serve the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Database(err) if is_unavailable(err))
    }
}
