use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

use crate::common::{DeviceId, UserId};

/// A client installation belonging to a user.
///
/// Unique per `(user_id, label)`; an absent label counts as the empty label.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub label: Option<String>,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Device {
    /// Create the device or refresh its push token and `last_seen_at`
    pub async fn upsert<'e, E: PgExecutor<'e>>(
        user_id: UserId,
        label: Option<&str>,
        push_token: Option<&str>,
        executor: E,
    ) -> Result<Self> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (user_id, label, push_token)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, (COALESCE(label, ''))) DO UPDATE
                SET push_token = COALESCE(EXCLUDED.push_token, devices.push_token),
                    last_seen_at = now()
            RETURNING id, user_id, label, push_token, created_at, last_seen_at
            "#,
        )
        .bind(user_id)
        .bind(label)
        .bind(push_token)
        .fetch_one(executor)
        .await?;
        Ok(device)
    }
}
