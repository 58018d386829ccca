use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::AuthError;
use super::jwt::{Claims, JwtService};
use super::models::{Session, SessionRotation};
use super::refresh_token::RefreshToken;
use crate::common::{DeviceId, DigestKey, SessionId, UserId};
use crate::kernel::{BaseClock, BaseIdentityTransaction, BaseSessionStore};

/// Token pair handed to the client after login or refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tokens {
    #[serde(rename = "access")]
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    #[serde(rename = "refresh")]
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub session_id: SessionId,
}

/// Session & token lifecycle: issue, rotate, revoke, verify.
///
/// Sessions move Active -> (Rotated in place)* -> Revoked | Expired; the
/// terminal states remove the row.
pub struct SessionManager {
    store: Arc<dyn BaseSessionStore>,
    clock: Arc<dyn BaseClock>,
    jwt: JwtService,
    refresh_key: DigestKey,
    refresh_ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn BaseSessionStore>,
        clock: Arc<dyn BaseClock>,
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: chrono::Duration,
        refresh_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            jwt: JwtService::new(access_secret, access_ttl),
            refresh_key: DigestKey::new(refresh_secret),
            refresh_ttl,
        }
    }

    /// Start a new session for an already resolved user and device
    pub async fn issue_session(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: &str,
        ip: &str,
    ) -> Result<Tokens, AuthError> {
        let (session, tokens) = self.prepare_session(user_id, device_id, user_agent, ip)?;
        self.store.upsert(&session).await.map_err(AuthError::Store)?;

        info!(session_id = %session.id, user_id = %user_id, "Session issued");
        Ok(tokens)
    }

    /// Same as [`issue_session`](Self::issue_session), but the row is written
    /// inside a caller-owned unit of work and only persists if it commits.
    pub async fn issue_session_in(
        &self,
        tx: &mut dyn BaseIdentityTransaction,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: &str,
        ip: &str,
    ) -> Result<Tokens, AuthError> {
        let (session, tokens) = self.prepare_session(user_id, device_id, user_agent, ip)?;
        tx.insert_session(&session).await.map_err(AuthError::Store)?;

        debug!(session_id = %session.id, user_id = %user_id, "Session staged");
        Ok(tokens)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token stops working as soon as this succeeds.
    pub async fn refresh_session(
        &self,
        raw_refresh_token: &str,
        user_agent: &str,
        ip: &str,
    ) -> Result<Tokens, AuthError> {
        let presented = RefreshToken::parse(raw_refresh_token)?;
        let session_id = presented.session_id();

        let session = self
            .store
            .find(session_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or_else(|| {
                debug!(%session_id, "Refresh for unknown session");
                AuthError::SessionNotFound
            })?;

        let now = self.clock.now();
        if session.is_expired(now) {
            if let Err(e) = self.store.delete(session_id).await {
                warn!(%session_id, error = %e, "Failed to remove expired session");
            } else {
                info!(%session_id, "Expired session removed");
            }
            return Err(AuthError::InvalidRefreshToken);
        }

        if !self
            .refresh_key
            .verify(presented.as_str().as_bytes(), &session.refresh_token_digest)
        {
            warn!(%session_id, "Refresh token digest mismatch");
            return Err(AuthError::InvalidRefreshToken);
        }

        let next = RefreshToken::generate(session_id);
        let rotation = SessionRotation {
            id: session_id,
            expected_digest: session.refresh_token_digest.clone(),
            new_digest: self.refresh_key.digest(next.as_str().as_bytes()),
            expires_at: self.refresh_expiry(now)?,
            user_agent: user_agent.to_string(),
            ip: ip.to_string(),
            used_at: now,
        };

        if !self.store.rotate(&rotation).await.map_err(AuthError::Store)? {
            warn!(%session_id, "Concurrent refresh won the rotation");
            return Err(AuthError::InvalidRefreshToken);
        }

        let mut rotated = session;
        rotated.apply(&rotation);

        info!(%session_id, "Session rotated");
        self.tokens_for(&rotated, next, now)
    }

    /// Delete the session the refresh token belongs to.
    ///
    /// Fails with [`AuthError::SessionGone`] if the token was already rotated
    /// away or revoked.
    pub async fn revoke_session(&self, raw_refresh_token: &str) -> Result<(), AuthError> {
        let presented = RefreshToken::parse(raw_refresh_token)?;
        let session_id = presented.session_id();
        let digest = self.refresh_key.digest(presented.as_str().as_bytes());

        let removed = self
            .store
            .delete_matching(session_id, &digest)
            .await
            .map_err(AuthError::Store)?;

        if !removed {
            debug!(%session_id, "Revocation matched no session");
            return Err(AuthError::SessionGone);
        }

        info!(%session_id, "Session revoked");
        Ok(())
    }

    /// Stateless check of an access token's algorithm, signature and expiry
    pub fn parse_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.jwt.verify_token(token, self.clock.now())
    }

    fn prepare_session(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        user_agent: &str,
        ip: &str,
    ) -> Result<(Session, Tokens), AuthError> {
        let now = self.clock.now();
        let session_id = SessionId::new();
        let refresh = RefreshToken::generate(session_id);

        let session = Session {
            id: session_id,
            user_id,
            device_id,
            refresh_token_digest: self.refresh_key.digest(refresh.as_str().as_bytes()),
            expires_at: self.refresh_expiry(now)?,
            user_agent: user_agent.to_string(),
            ip: ip.to_string(),
            created_at: now,
            updated_at: now,
            last_used_at: now,
        };

        let tokens = self.tokens_for(&session, refresh, now)?;
        Ok((session, tokens))
    }

    fn refresh_expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        now.checked_add_signed(self.refresh_ttl)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("refresh TTL out of range")))
    }

    fn tokens_for(
        &self,
        session: &Session,
        refresh: RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Tokens, AuthError> {
        let (access_token, access_expires_at) =
            self.jwt
                .create_token(session.user_id, session.device_id, session.id, now)?;

        Ok(Tokens {
            access_token,
            access_expires_at,
            refresh_token: refresh.into_string(),
            refresh_expires_at: session.expires_at,
            user_id: session.user_id,
            device_id: session.device_id,
            session_id: session.id,
        })
    }
}
