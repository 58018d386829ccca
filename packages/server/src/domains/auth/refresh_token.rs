use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use super::errors::AuthError;
use crate::common::SessionId;

/// Random bytes in the secret half of a refresh token
pub const SECRET_BYTES: usize = 32;

/// Opaque client-held refresh token: `<session-id>.<base64url(32 random bytes)>`.
///
/// The session id alone proves nothing; only the digest of the whole string
/// matching the stored one does.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    session_id: SessionId,
    raw: String,
}

impl RefreshToken {
    pub fn generate(session_id: SessionId) -> Self {
        let mut secret = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);
        let raw = format!("{}.{}", session_id, URL_SAFE_NO_PAD.encode(secret));
        Self { session_id, raw }
    }

    /// Split a presented token into its session id; any other shape is invalid.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let mut parts = raw.split('.');
        let (Some(session_part), Some(_secret), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidRefreshToken);
        };

        let session_id =
            SessionId::parse(session_part).map_err(|_| AuthError::InvalidRefreshToken)?;

        Ok(Self {
            session_id,
            raw: raw.to_string(),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
