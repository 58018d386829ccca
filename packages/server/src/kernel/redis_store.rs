//! Redis-backed challenge store

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::kernel::BaseChallengeStore;

/// Challenge entries as plain Redis strings with `SET .. EX`.
///
/// Redis drops the key when the TTL runs out, so expiry needs no sweeper.
#[derive(Clone)]
pub struct RedisChallengeStore {
    conn: ConnectionManager,
}

impl RedisChallengeStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl BaseChallengeStore for RedisChallengeStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        // EX 0 is an error in Redis; sub-second TTLs round up
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
