use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

use crate::common::UserId;

/// A person, identified by a caller-normalized phone number
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl User {
    /// Create the user for `phone`, or touch `updated_at` if it exists
    pub async fn upsert_by_phone<'e, E: PgExecutor<'e>>(phone: &str, executor: E) -> Result<Self> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (phone)
            VALUES ($1)
            ON CONFLICT (phone) DO UPDATE SET updated_at = now()
            RETURNING id, phone, display_name, created_at, updated_at
            "#,
        )
        .bind(phone)
        .fetch_one(executor)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        id: UserId,
        executor: E,
    ) -> Result<Option<Self>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, phone, display_name, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(user)
    }

    pub async fn find_by_phone<'e, E: PgExecutor<'e>>(
        phone: &str,
        executor: E,
    ) -> Result<Option<Self>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, phone, display_name, created_at, updated_at FROM users WHERE phone = $1",
        )
        .bind(phone)
        .fetch_optional(executor)
        .await?;
        Ok(user)
    }
}
