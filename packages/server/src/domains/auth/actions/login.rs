//! Login action: verify code, resolve user and device, open a session

use tracing::{error, info};

use crate::common::phone_log_tag;
use crate::domains::auth::errors::{AuthError, LoginError};
use crate::domains::auth::service::Tokens;
use crate::domains::directory::{Device, User};
use crate::kernel::{BaseIdentityTransaction, ServerDeps};

#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub phone: String,
    pub code: String,
    pub device_label: Option<String>,
    pub push_token: Option<String>,
    pub user_agent: String,
    pub ip: String,
}

/// Result of a login attempt
#[derive(Debug)]
pub enum LoginResult {
    Authenticated {
        user: User,
        device: Device,
        tokens: Tokens,
    },
    InvalidCode,
}

/// Exchange a phone + code for a session.
///
/// The code is consumed on success before anything else is written. The
/// user/device upsert and the session insert then commit together or not at
/// all.
pub async fn login(request: LoginRequest, deps: &ServerDeps) -> Result<LoginResult, LoginError> {
    if !deps.otp.verify_challenge(&request.phone, &request.code).await? {
        info!(phone = %phone_log_tag(&request.phone), "Login refused: invalid code");
        return Ok(LoginResult::InvalidCode);
    }

    let phone = request.phone.trim();
    let label = non_empty(request.device_label.as_deref());
    let push_token = non_empty(request.push_token.as_deref());

    let mut tx = deps.unit_of_work.begin().await.map_err(AuthError::Store)?;

    let opened = open_session(&mut *tx, deps, phone, label, push_token, &request).await;
    match opened {
        Ok((user, device, tokens)) => {
            tx.commit().await.map_err(AuthError::Store)?;
            info!(
                user_id = %user.id,
                device_id = %device.id,
                session_id = %tokens.session_id,
                "Login succeeded"
            );
            Ok(LoginResult::Authenticated {
                user,
                device,
                tokens,
            })
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Failed to roll back login");
            }
            Err(e.into())
        }
    }
}

async fn open_session(
    tx: &mut dyn BaseIdentityTransaction,
    deps: &ServerDeps,
    phone: &str,
    label: Option<&str>,
    push_token: Option<&str>,
    request: &LoginRequest,
) -> Result<(User, Device, Tokens), AuthError> {
    let (user, device) = tx
        .upsert_user_and_device(phone, label, push_token)
        .await
        .map_err(AuthError::Store)?;

    let tokens = deps
        .sessions
        .issue_session_in(tx, user.id, device.id, &request.user_agent, &request.ip)
        .await?;

    Ok((user, device, tokens))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_optional_fields_become_none() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(Some(" iPhone ")), Some("iPhone"));
    }
}
