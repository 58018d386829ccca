//! Logout action

use tracing::info;

use crate::domains::auth::authorization::ensure_same_session;
use crate::domains::auth::errors::AuthError;
use crate::domains::auth::jwt::Claims;
use crate::kernel::ServerDeps;

/// Revoke the caller's own session.
///
/// `claims` come from the verified access token; the refresh token must name
/// the same session, so one session cannot be used to end another.
pub async fn logout(
    claims: &Claims,
    raw_refresh_token: &str,
    deps: &ServerDeps,
) -> Result<(), AuthError> {
    let token = ensure_same_session(claims, raw_refresh_token)?;
    deps.sessions.revoke_session(token.as_str()).await?;

    info!(user_id = %claims.uid, session_id = %claims.sid, "Logged out");
    Ok(())
}
