//! End-to-end flows on the in-memory kernel.
//!
//! Covers:
//! - OTP request/verify, single use, replacement and expiry
//! - Delivery failures leaving no challenge behind
//! - Session issue, rotation, revocation and expiry
//! - Access token verification
//! - Login/logout actions

use auth_core::domains::auth::actions::{login, logout, LoginRequest, LoginResult};
use auth_core::domains::auth::{AuthError, LoginError, Tokens};
use auth_core::domains::otp::OtpError;
use auth_core::kernel::test_dependencies::{test_settings, MockSmsGateway};
use auth_core::kernel::{ServerDeps, TestDependencies};
use chrono::Duration as ChronoDuration;
use std::time::Duration;

const PHONE: &str = "+15551234567";

fn setup() -> (TestDependencies, ServerDeps) {
    let test = TestDependencies::new();
    let deps = test.clone().into_deps();
    (test, deps)
}

async fn issue(deps: &ServerDeps) -> Tokens {
    deps.sessions
        .issue_session(
            auth_core::common::UserId::new(),
            auth_core::common::DeviceId::new(),
            "app/1.0",
            "10.0.0.1",
        )
        .await
        .unwrap()
}

async fn login_with_sms_code(
    test: &TestDependencies,
    deps: &ServerDeps,
    label: Option<&str>,
) -> LoginResult {
    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code_for(PHONE).unwrap();

    login(
        LoginRequest {
            phone: PHONE.to_string(),
            code,
            device_label: label.map(str::to_string),
            push_token: None,
            user_agent: "app/1.0".to_string(),
            ip: "10.0.0.1".to_string(),
        },
        deps,
    )
    .await
    .unwrap()
}

// ============================================================================
// OTP challenges
// ============================================================================

#[tokio::test]
async fn test_code_verifies_exactly_once() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();

    assert!(deps.otp.verify_challenge(PHONE, &code).await.unwrap());
    assert!(!deps.otp.verify_challenge(PHONE, &code).await.unwrap());
    assert!(test.challenge_store.is_empty());
}

#[tokio::test]
async fn test_concurrent_logins_share_one_code_once() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();
    // Both verifications read the challenge before either deletes it
    test.challenge_store.set_yielding(true);

    let request = LoginRequest {
        phone: PHONE.to_string(),
        code,
        ..Default::default()
    };
    let (a, b) = tokio::join!(
        login(request.clone(), &deps),
        login(request.clone(), &deps)
    );

    let authenticated = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|result| matches!(result, LoginResult::Authenticated { .. }))
        .count();
    assert_eq!(authenticated, 1);
    assert_eq!(test.sessions.session_count(), 1);
    assert!(test.challenge_store.is_empty());
}

#[tokio::test]
async fn test_wrong_code_does_not_consume_challenge() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    assert!(!deps.otp.verify_challenge(PHONE, wrong).await.unwrap());
    assert!(deps.otp.verify_challenge(PHONE, &code).await.unwrap());
}

#[tokio::test]
async fn test_new_request_replaces_previous_code() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();
    let first = test.sms.last_code().unwrap();
    deps.otp.request_challenge(PHONE).await.unwrap();
    let second = test.sms.last_code().unwrap();

    if first != second {
        assert!(!deps.otp.verify_challenge(PHONE, &first).await.unwrap());
    }
    assert!(deps.otp.verify_challenge(PHONE, &second).await.unwrap());
}

#[tokio::test]
async fn test_challenge_expires_with_ttl() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();

    test.clock.advance(ChronoDuration::seconds(300));

    assert!(!deps.otp.verify_challenge(PHONE, &code).await.unwrap());
}

#[tokio::test]
async fn test_challenges_are_per_phone() {
    let (test, deps) = setup();
    let other = "+15557654321";

    deps.otp.request_challenge(PHONE).await.unwrap();
    deps.otp.request_challenge(other).await.unwrap();
    let code = test.sms.last_code_for(PHONE).unwrap();
    let other_code = test.sms.last_code_for(other).unwrap();

    if code != other_code {
        assert!(!deps.otp.verify_challenge(other, &code).await.unwrap());
    }
    assert!(deps.otp.verify_challenge(PHONE, &code).await.unwrap());
    assert!(deps.otp.verify_challenge(other, &other_code).await.unwrap());
}

#[tokio::test]
async fn test_message_text_states_code_and_validity() {
    let (test, deps) = setup();

    deps.otp.request_challenge(PHONE).await.unwrap();

    let sent = test.sms.sent_messages();
    assert_eq!(sent.len(), 1);
    let (to, text) = &sent[0];
    assert_eq!(to, PHONE);
    assert!(text.contains(&test.sms.last_code().unwrap()));
    assert!(text.contains("Valid for 5 min"));
}

#[tokio::test]
async fn test_unavailable_gateway_leaves_no_challenge() {
    let test = TestDependencies::new().mock_sms(MockSmsGateway::new().unavailable());
    let deps = test.clone().into_deps();

    let result = deps.otp.request_challenge(PHONE).await;

    assert!(matches!(result, Err(OtpError::DeliveryUnavailable)));
    assert!(test.challenge_store.raw(&format!("otp:{}", PHONE)).is_none());
}

#[tokio::test]
async fn test_failing_gateway_leaves_no_challenge() {
    let test = TestDependencies::new().mock_sms(MockSmsGateway::new().failing());
    let deps = test.clone().into_deps();

    let result = deps.otp.request_challenge(PHONE).await;

    assert!(matches!(result, Err(OtpError::DeliveryFailed(_))));
    assert!(test.challenge_store.is_empty());
}

#[tokio::test]
async fn test_slow_gateway_times_out_and_leaves_no_challenge() {
    let mut settings = test_settings();
    settings.sms_timeout = Duration::from_millis(50);
    let test = TestDependencies::new()
        .with_settings(settings)
        .mock_sms(MockSmsGateway::new().hanging(Duration::from_secs(5)));
    let deps = test.clone().into_deps();

    let result = deps.otp.request_challenge(PHONE).await;

    assert!(matches!(result, Err(OtpError::DeliveryUnavailable)));
    assert!(test.challenge_store.is_empty());
    assert!(test.sms.sent_messages().is_empty());
}

#[tokio::test]
async fn test_store_outage_is_a_store_error() {
    let (test, deps) = setup();
    test.challenge_store.set_failing(true);

    assert!(matches!(
        deps.otp.request_challenge(PHONE).await,
        Err(OtpError::Store(_))
    ));
    assert!(matches!(
        deps.otp.verify_challenge(PHONE, "123456").await,
        Err(OtpError::Store(_))
    ));
    assert!(test.sms.sent_messages().is_empty());
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_refresh_rotates_within_same_session() {
    let (test, deps) = setup();
    let first = issue(&deps).await;

    let second = deps
        .sessions
        .refresh_session(&first.refresh_token, "app/1.1", "10.0.0.2")
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.user_id, first.user_id);
    assert_eq!(second.device_id, first.device_id);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(test.sessions.session_count(), 1);

    // The old token is dead, the new one is live
    assert!(matches!(
        deps.sessions
            .refresh_session(&first.refresh_token, "app/1.1", "10.0.0.2")
            .await,
        Err(AuthError::InvalidRefreshToken)
    ));
    assert!(deps
        .sessions
        .refresh_session(&second.refresh_token, "app/1.1", "10.0.0.2")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_concurrent_refreshes_have_one_winner() {
    let (test, deps) = setup();
    let tokens = issue(&deps).await;
    // Both refreshes read the row before either rotates it
    test.sessions.set_yielding(true);

    let (a, b) = tokio::join!(
        deps.sessions
            .refresh_session(&tokens.refresh_token, "app/1.0", "10.0.0.1"),
        deps.sessions
            .refresh_session(&tokens.refresh_token, "app/1.0", "10.0.0.1"),
    );

    let (winner, loser) = match (a, b) {
        (Ok(winner), loser) | (loser, Ok(winner)) => (winner, loser),
        (Err(a), Err(b)) => panic!("no refresh won: {a:?} / {b:?}"),
    };
    assert!(matches!(loser, Err(AuthError::InvalidRefreshToken)));

    test.sessions.set_yielding(false);
    assert!(deps
        .sessions
        .refresh_session(&winner.refresh_token, "app/1.1", "10.0.0.2")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_revoke_succeeds_once() {
    let (test, deps) = setup();
    let tokens = issue(&deps).await;

    deps.sessions.revoke_session(&tokens.refresh_token).await.unwrap();
    assert_eq!(test.sessions.session_count(), 0);

    assert!(matches!(
        deps.sessions.revoke_session(&tokens.refresh_token).await,
        Err(AuthError::SessionGone)
    ));
    assert!(matches!(
        deps.sessions
            .refresh_session(&tokens.refresh_token, "app/1.0", "10.0.0.1")
            .await,
        Err(AuthError::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_rotated_away_token_cannot_revoke() {
    let (test, deps) = setup();
    let first = issue(&deps).await;
    deps.sessions
        .refresh_session(&first.refresh_token, "app/1.0", "10.0.0.1")
        .await
        .unwrap();

    assert!(matches!(
        deps.sessions.revoke_session(&first.refresh_token).await,
        Err(AuthError::SessionGone)
    ));
    assert_eq!(test.sessions.session_count(), 1);
}

#[tokio::test]
async fn test_malformed_refresh_tokens_are_invalid() {
    let (_, deps) = setup();

    for raw in ["", "nodot", "a.b.c", "not-a-uuid.secret"] {
        assert!(matches!(
            deps.sessions.refresh_session(raw, "ua", "ip").await,
            Err(AuthError::InvalidRefreshToken)
        ));
        assert!(matches!(
            deps.sessions.revoke_session(raw).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }
}

#[tokio::test]
async fn test_expired_session_is_removed_on_refresh() {
    let (test, deps) = setup();
    let tokens = issue(&deps).await;

    test.clock.advance(ChronoDuration::days(30));
    // Exactly at expiry the session is still usable
    let tokens = deps
        .sessions
        .refresh_session(&tokens.refresh_token, "app/1.0", "10.0.0.1")
        .await
        .unwrap();

    test.clock.advance(ChronoDuration::days(30) + ChronoDuration::seconds(1));
    assert!(matches!(
        deps.sessions
            .refresh_session(&tokens.refresh_token, "app/1.0", "10.0.0.1")
            .await,
        Err(AuthError::InvalidRefreshToken)
    ));
    assert_eq!(test.sessions.session_count(), 0);
}

// ============================================================================
// Access tokens
// ============================================================================

#[tokio::test]
async fn test_access_token_expires_with_clock() {
    let (test, deps) = setup();
    let tokens = issue(&deps).await;

    let claims = deps.sessions.parse_access_token(&tokens.access_token).unwrap();
    assert_eq!(claims.sid, tokens.session_id);

    test.clock.advance(ChronoDuration::minutes(15));
    assert!(matches!(
        deps.sessions.parse_access_token(&tokens.access_token),
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_access_token_from_other_secret_is_rejected() {
    let (_, deps) = setup();
    let mut settings = test_settings();
    settings.access_secret = "another-access-secret-0123456789abcdef".to_string();
    let other = TestDependencies::new().with_settings(settings).into_deps();

    let tokens = issue(&other).await;

    assert!(matches!(
        deps.sessions.parse_access_token(&tokens.access_token),
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_authorize_bearer_header() {
    let (_, deps) = setup();
    let tokens = issue(&deps).await;

    let header = format!("Bearer {}", tokens.access_token);
    let claims = deps.sessions.authorize_bearer(Some(header.as_str())).unwrap();
    assert_eq!(claims.uid, tokens.user_id);

    assert!(matches!(
        deps.sessions.authorize_bearer(Some(tokens.access_token.as_str())),
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        deps.sessions.authorize_bearer(Some("Bearer garbage")),
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_tokens_serialize_with_client_field_names() {
    let (_, deps) = setup();
    let tokens = issue(&deps).await;

    let json = serde_json::to_value(&tokens).unwrap();
    for field in [
        "access",
        "accessExpiresAt",
        "refresh",
        "refreshExpiresAt",
        "userId",
        "deviceId",
        "sessionId",
    ] {
        assert!(json.get(field).is_some(), "missing {field}");
    }
    assert_eq!(json["sessionId"], tokens.session_id.to_string());
}

// ============================================================================
// Login / logout
// ============================================================================

#[tokio::test]
async fn test_login_creates_user_device_and_session() {
    let (test, deps) = setup();

    let LoginResult::Authenticated {
        user,
        device,
        tokens,
    } = login_with_sms_code(&test, &deps, Some(" iPhone ")).await
    else {
        panic!("expected login to succeed");
    };

    assert_eq!(user.phone, PHONE);
    assert_eq!(device.user_id, user.id);
    assert_eq!(device.label.as_deref(), Some("iPhone"));
    assert_eq!(tokens.user_id, user.id);
    assert_eq!(tokens.device_id, device.id);
    assert!(test.sessions.session(tokens.session_id).is_some());
}

#[tokio::test]
async fn test_repeat_login_reuses_user_and_device() {
    let (test, deps) = setup();

    let LoginResult::Authenticated { user: u1, device: d1, tokens: t1 } =
        login_with_sms_code(&test, &deps, Some("iPhone")).await
    else {
        panic!("expected first login to succeed");
    };
    let LoginResult::Authenticated { user: u2, device: d2, tokens: t2 } =
        login_with_sms_code(&test, &deps, Some("iPhone")).await
    else {
        panic!("expected second login to succeed");
    };

    assert_eq!(u1.id, u2.id);
    assert_eq!(d1.id, d2.id);
    assert_ne!(t1.session_id, t2.session_id);
    assert_eq!(test.sessions.users().len(), 1);
    assert_eq!(test.sessions.devices().len(), 1);
    assert_eq!(test.sessions.session_count(), 2);
}

#[tokio::test]
async fn test_login_with_wrong_code_writes_nothing() {
    let (test, deps) = setup();
    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    let result = login(
        LoginRequest {
            phone: PHONE.to_string(),
            code: wrong.to_string(),
            user_agent: "app/1.0".to_string(),
            ip: "10.0.0.1".to_string(),
            ..Default::default()
        },
        &deps,
    )
    .await
    .unwrap();

    assert!(matches!(result, LoginResult::InvalidCode));
    assert!(test.sessions.users().is_empty());
    assert_eq!(test.sessions.session_count(), 0);
}

#[tokio::test]
async fn test_failed_session_insert_rolls_back_directory() {
    let (test, deps) = setup();
    deps.otp.request_challenge(PHONE).await.unwrap();
    let code = test.sms.last_code().unwrap();
    test.sessions.fail_session_writes(true);

    let result = login(
        LoginRequest {
            phone: PHONE.to_string(),
            code: code.clone(),
            ..Default::default()
        },
        &deps,
    )
    .await;

    assert!(matches!(result, Err(LoginError::Auth(AuthError::Store(_)))));
    assert!(test.sessions.users().is_empty());
    assert!(test.sessions.devices().is_empty());
    assert_eq!(test.sessions.rollback_count(), 1);
    // The code was consumed before the unit of work started
    assert!(!deps.otp.verify_challenge(PHONE, &code).await.unwrap());
}

#[tokio::test]
async fn test_logout_revokes_own_session() {
    let (test, deps) = setup();
    let LoginResult::Authenticated { tokens, .. } = login_with_sms_code(&test, &deps, None).await
    else {
        panic!("expected login to succeed");
    };
    let claims = deps.sessions.parse_access_token(&tokens.access_token).unwrap();

    logout(&claims, &tokens.refresh_token, &deps).await.unwrap();

    assert_eq!(test.sessions.session_count(), 0);
    assert!(matches!(
        logout(&claims, &tokens.refresh_token, &deps).await,
        Err(AuthError::SessionGone)
    ));
}

#[tokio::test]
async fn test_logout_refuses_foreign_session() {
    let (test, deps) = setup();
    let mine = issue(&deps).await;
    let theirs = issue(&deps).await;
    let claims = deps.sessions.parse_access_token(&mine.access_token).unwrap();

    let err = logout(&claims, &theirs.refresh_token, &deps)
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::SessionMismatch));
    assert!(err.is_unauthorized());
    assert!(test.sessions.session(theirs.session_id).is_some());
}
