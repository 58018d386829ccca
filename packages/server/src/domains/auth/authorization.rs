use tracing::debug;

use super::errors::AuthError;
use super::jwt::Claims;
use super::refresh_token::RefreshToken;
use super::service::SessionManager;

const BEARER: &str = "bearer ";

/// Pull the token out of an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively; anything else, including a raw
/// token without a scheme, is `Unauthorized`.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Unauthorized)?.trim();

    let scheme = header.get(..BEARER.len()).ok_or(AuthError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Err(AuthError::Unauthorized);
    }

    let token = header[BEARER.len()..].trim();
    if token.is_empty() {
        return Err(AuthError::Unauthorized);
    }
    Ok(token)
}

impl SessionManager {
    /// Authorize a request from its `Authorization` header value
    pub fn authorize_bearer(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let token = bearer_token(header)?;
        self.parse_access_token(token).map_err(|e| {
            debug!(error = %e, "Bearer token rejected");
            AuthError::Unauthorized
        })
    }
}

/// A refresh token may only act on the session the caller is authenticated as
pub fn ensure_same_session(
    claims: &Claims,
    raw_refresh_token: &str,
) -> Result<RefreshToken, AuthError> {
    let token = RefreshToken::parse(raw_refresh_token)?;
    if token.session_id() != claims.sid {
        debug!(
            session_id = %claims.sid,
            presented = %token.session_id(),
            "Refresh token from another session"
        );
        return Err(AuthError::SessionMismatch);
    }
    Ok(token)
}
