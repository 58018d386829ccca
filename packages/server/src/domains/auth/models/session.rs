use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::common::{DeviceId, SessionId, UserId};

/// Durable login session, one row per refresh-token lineage.
///
/// `refresh_token_digest` is the HMAC of the only refresh token currently
/// valid for this session.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub refresh_token_digest: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// In-place replacement of a session's refresh token, guarded by the digest
/// the caller just verified.
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub id: SessionId,
    pub expected_digest: Vec<u8>,
    pub new_digest: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub ip: String,
    pub used_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Apply `rotation` to this row if it still carries the expected digest
    pub fn apply(&mut self, rotation: &SessionRotation) -> bool {
        if self.id != rotation.id || self.refresh_token_digest != rotation.expected_digest {
            return false;
        }
        self.refresh_token_digest = rotation.new_digest.clone();
        self.expires_at = rotation.expires_at;
        self.user_agent = rotation.user_agent.clone();
        self.ip = rotation.ip.clone();
        self.updated_at = rotation.used_at;
        self.last_used_at = rotation.used_at;
        true
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Session {
    pub async fn upsert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, device_id, refresh_token_digest, expires_at,
                user_agent, ip, created_at, updated_at, last_used_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                device_id = EXCLUDED.device_id,
                refresh_token_digest = EXCLUDED.refresh_token_digest,
                expires_at = EXCLUDED.expires_at,
                user_agent = EXCLUDED.user_agent,
                ip = EXCLUDED.ip,
                updated_at = EXCLUDED.updated_at,
                last_used_at = EXCLUDED.last_used_at
            "#,
        )
        .bind(self.id)
        .bind(self.user_id)
        .bind(self.device_id)
        .bind(&self.refresh_token_digest)
        .bind(self.expires_at)
        .bind(&self.user_agent)
        .bind(&self.ip)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.last_used_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        id: SessionId,
        executor: E,
    ) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, device_id, refresh_token_digest, expires_at,
                   user_agent, ip, created_at, updated_at, last_used_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(session)
    }

    /// Conditional update: only the caller holding the current digest wins
    pub async fn rotate<'e, E: PgExecutor<'e>>(
        rotation: &SessionRotation,
        executor: E,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET refresh_token_digest = $1,
                expires_at = $2,
                user_agent = $3,
                ip = $4,
                updated_at = $5,
                last_used_at = $5
            WHERE id = $6 AND refresh_token_digest = $7
            "#,
        )
        .bind(&rotation.new_digest)
        .bind(rotation.expires_at)
        .bind(&rotation.user_agent)
        .bind(&rotation.ip)
        .bind(rotation.used_at)
        .bind(rotation.id)
        .bind(&rotation.expected_digest)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(id: SessionId, executor: E) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete_matching<'e, E: PgExecutor<'e>>(
        id: SessionId,
        digest: &[u8],
        executor: E,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE id = $1 AND refresh_token_digest = $2")
                .bind(id)
                .bind(digest)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
