use thiserror::Error;

use crate::domains::otp::OtpError;

/// Session and token failures.
///
/// Several variants are kept apart for logging only; callers should map every
/// variant for which [`AuthError::is_unauthorized`] holds to one uniform
/// "unauthorized" response.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Bad input: {0}")]
    BadInput(&'static str),

    /// Malformed token, expired session or digest mismatch
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session not found")]
    SessionNotFound,

    /// Revocation matched no row: never existed, rotated away, or already revoked
    #[error("Session already gone")]
    SessionGone,

    #[error("Refresh token belongs to another session")]
    SessionMismatch,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    /// True for every credential problem; false for bad input and infrastructure failures.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidRefreshToken
                | AuthError::SessionNotFound
                | AuthError::SessionGone
                | AuthError::SessionMismatch
                | AuthError::Unauthorized
                | AuthError::InvalidToken
        )
    }
}

/// Failures of the compound login action
#[derive(Error, Debug)]
pub enum LoginError {
    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
