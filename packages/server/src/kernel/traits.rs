// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Challenge and session rules live in domains/ and are written against these traits.
//
// Naming convention: Base* for trait names (e.g., BaseChallengeStore, BaseSmsGateway)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::common::SessionId;
use crate::domains::auth::models::{Session, SessionRotation};
use crate::domains::directory::models::{Device, User};

// =============================================================================
// Clock Trait
// =============================================================================

/// Source of wall-clock time for every expiry decision.
pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// =============================================================================
// Challenge Store Trait (Infrastructure - ephemeral keyed store)
// =============================================================================

#[async_trait]
pub trait BaseChallengeStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value and its expiry
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Read the live value for `key`; `None` if missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. `true` only if this call removed a live entry
    async fn delete(&self, key: &str) -> Result<bool>;
}

// =============================================================================
// SMS Gateway Trait (Infrastructure - SMS delivery)
// =============================================================================

#[derive(Debug, Error)]
pub enum SmsError {
    /// Gateway is not configured or could not be reached
    #[error("sms gateway unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait BaseSmsGateway: Send + Sync {
    async fn send_sms(&self, destination: &str, text: &str) -> std::result::Result<(), SmsError>;
}

// =============================================================================
// Session Store Trait (Infrastructure - durable session rows)
// =============================================================================

#[async_trait]
pub trait BaseSessionStore: Send + Sync {
    /// Insert a session, replacing any row with the same id
    async fn upsert(&self, session: &Session) -> Result<()>;

    async fn find(&self, id: SessionId) -> Result<Option<Session>>;

    /// Apply `rotation` only if the stored digest still equals
    /// `rotation.expected_digest`. Returns whether a row was updated.
    async fn rotate(&self, rotation: &SessionRotation) -> Result<bool>;

    async fn delete(&self, id: SessionId) -> Result<()>;

    /// Delete the session only if both id and digest match. Returns whether a
    /// row was removed.
    async fn delete_matching(&self, id: SessionId, digest: &[u8]) -> Result<bool>;
}

// =============================================================================
// Unit of Work Traits (Infrastructure - identity + session in one commit)
// =============================================================================

#[async_trait]
pub trait BaseUnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BaseIdentityTransaction>>;
}

/// Writes staged inside one all-or-nothing unit of work.
///
/// Dropping the transaction without calling `commit` discards every write.
#[async_trait]
pub trait BaseIdentityTransaction: Send {
    /// Resolve the user for `phone` and the device for `(user, label)`,
    /// creating either when missing.
    async fn upsert_user_and_device(
        &mut self,
        phone: &str,
        label: Option<&str>,
        push_token: Option<&str>,
    ) -> Result<(User, Device)>;

    async fn insert_session(&mut self, session: &Session) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
