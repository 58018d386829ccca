//! Server dependencies (using traits for testability)
//!
//! This module provides the central dependency container used by the auth
//! actions. All external services use trait abstractions to enable testing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use twilio::{TwilioOptions, TwilioService};

use crate::config::{AuthSettings, Config};
use crate::domains::auth::SessionManager;
use crate::domains::otp::ChallengeManager;
use crate::kernel::postgres::{PgSessionStore, PgUnitOfWork};
use crate::kernel::redis_store::RedisChallengeStore;
use crate::kernel::{
    BaseChallengeStore, BaseClock, BaseSessionStore, BaseSmsGateway, BaseUnitOfWork, SmsError,
};

// =============================================================================
// System clock
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl BaseClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// TwilioService Adapter (implements BaseSmsGateway trait)
// =============================================================================

/// Wrapper around TwilioService that implements BaseSmsGateway trait
pub struct TwilioAdapter(pub Arc<TwilioService>);

impl TwilioAdapter {
    pub fn new(service: Arc<TwilioService>) -> Self {
        Self(service)
    }
}

#[async_trait]
impl BaseSmsGateway for TwilioAdapter {
    async fn send_sms(&self, destination: &str, text: &str) -> std::result::Result<(), SmsError> {
        match self.0.send_sms(destination, text).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unreachable() => Err(SmsError::Unavailable(e.to_string())),
            Err(e) => Err(SmsError::Failed(e.into())),
        }
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Shared services handed to every action
#[derive(Clone)]
pub struct ServerDeps {
    pub otp: Arc<ChallengeManager>,
    pub sessions: Arc<SessionManager>,
    /// Opens the transaction shared by the directory upsert and session insert
    pub unit_of_work: Arc<dyn BaseUnitOfWork>,
    pub clock: Arc<dyn BaseClock>,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    pub fn new(
        settings: &AuthSettings,
        challenge_store: Arc<dyn BaseChallengeStore>,
        sms_gateway: Arc<dyn BaseSmsGateway>,
        session_store: Arc<dyn BaseSessionStore>,
        unit_of_work: Arc<dyn BaseUnitOfWork>,
        clock: Arc<dyn BaseClock>,
    ) -> Self {
        let otp = ChallengeManager::new(
            challenge_store,
            sms_gateway,
            settings.otp_secret.as_bytes(),
            settings.otp_ttl,
        )
        .with_delivery_timeout(settings.sms_timeout);

        let sessions = SessionManager::new(
            session_store,
            clock.clone(),
            settings.access_secret.as_bytes(),
            settings.refresh_secret.as_bytes(),
            settings.access_ttl,
            settings.refresh_ttl,
        );

        Self {
            otp: Arc::new(otp),
            sessions: Arc::new(sessions),
            unit_of_work,
            clock,
        }
    }

    /// Build production dependencies: Postgres (with migrations), Redis and Twilio
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        info!("Connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(config.database_acquire_timeout)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations complete");

        let challenge_store = RedisChallengeStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis");

        let twilio_options = TwilioOptions::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_from_number.clone(),
        )
        .with_timeout(config.auth.sms_timeout);
        if !twilio_options.is_configured() {
            warn!("Twilio is not configured; verification codes cannot be delivered");
        }
        let twilio = TwilioService::new(twilio_options).context("Failed to build Twilio client")?;

        Ok(Self::new(
            &config.auth,
            Arc::new(challenge_store),
            Arc::new(TwilioAdapter::new(Arc::new(twilio))),
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgUnitOfWork::new(pool)),
            Arc::new(SystemClock),
        ))
    }
}
