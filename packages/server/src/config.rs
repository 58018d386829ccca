use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;
/// Ten years; longer token lifetimes are configuration mistakes
const MAX_TOKEN_TTL_SECONDS: i64 = 10 * 365 * 24 * 3600;

/// Secrets and lifetimes consumed by the OTP and session managers.
#[derive(Clone)]
pub struct AuthSettings {
    pub otp_secret: String,
    pub otp_ttl: Duration,
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: chrono::Duration,
    pub refresh_ttl: chrono::Duration,
    /// Upper bound on a single SMS gateway call
    pub sms_timeout: Duration,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("otp_secret", &"<redacted>")
            .field("otp_ttl", &self.otp_ttl)
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("sms_timeout", &self.sms_timeout)
            .finish()
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
    pub redis_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_from_number: String,
    pub auth: AuthSettings,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("database_max_connections", &self.database_max_connections)
            .field("database_acquire_timeout", &self.database_acquire_timeout)
            .field("redis_url", &self.redis_url)
            .field("twilio_account_sid", &self.twilio_account_sid)
            .field("twilio_auth_token", &"<redacted>")
            .field("twilio_from_number", &self.twilio_from_number)
            .field("auth", &self.auth)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set and at least 32 characters")]
    WeakSecret(&'static str),

    #[error("OTP_TTL_SECONDS must be greater than zero")]
    InvalidOtpTtl,

    #[error("DATABASE_URL must be provided")]
    MissingDatabaseUrl,

    #[error("ACCESS_TOKEN_TTL_SECONDS must be greater than zero")]
    InvalidAccessTtl,

    #[error("REFRESH_TOKEN_TTL_SECONDS must not be shorter than ACCESS_TOKEN_TTL_SECONDS")]
    InvalidRefreshTtl,

    #[error("{0} must not exceed ten years")]
    TtlTooLong(&'static str),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            database_acquire_timeout: Duration::from_secs(parse_or(
                "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                5,
            )?),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_from_number: env::var("TWILIO_FROM_NUMBER").unwrap_or_default(),
            auth: AuthSettings {
                otp_secret: env::var("OTP_SECRET").context("OTP_SECRET must be set")?,
                otp_ttl: Duration::from_secs(parse_or("OTP_TTL_SECONDS", 300)?),
                access_secret: env::var("ACCESS_SECRET").context("ACCESS_SECRET must be set")?,
                refresh_secret: env::var("REFRESH_SECRET")
                    .context("REFRESH_SECRET must be set")?,
                access_ttl: token_ttl_or("ACCESS_TOKEN_TTL_SECONDS", 900)?,
                refresh_ttl: token_ttl_or("REFRESH_TOKEN_TTL_SECONDS", 30 * 24 * 3600)?,
                sms_timeout: Duration::from_secs(parse_or("SMS_TIMEOUT_SECONDS", 10)?),
            },
        })
    }

    /// Reject weak secrets and inconsistent lifetimes before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        self.auth.validate()
    }
}

impl AuthSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_secret(&self.otp_secret, "OTP_SECRET")?;
        if self.otp_ttl.is_zero() {
            return Err(ConfigError::InvalidOtpTtl);
        }
        validate_secret(&self.access_secret, "ACCESS_SECRET")?;
        validate_secret(&self.refresh_secret, "REFRESH_SECRET")?;
        if self.access_ttl <= chrono::Duration::zero() {
            return Err(ConfigError::InvalidAccessTtl);
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(ConfigError::InvalidRefreshTtl);
        }
        let max = chrono::Duration::seconds(MAX_TOKEN_TTL_SECONDS);
        if self.access_ttl > max {
            return Err(ConfigError::TtlTooLong("ACCESS_TOKEN_TTL_SECONDS"));
        }
        if self.refresh_ttl > max {
            return Err(ConfigError::TtlTooLong("REFRESH_TOKEN_TTL_SECONDS"));
        }
        Ok(())
    }
}

fn validate_secret(secret: &str, name: &'static str) -> Result<(), ConfigError> {
    let secret = secret.trim();
    if secret.len() < MIN_SECRET_LEN || secret.contains("change_me") {
        return Err(ConfigError::WeakSecret(name));
    }
    Ok(())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        _ => Ok(default),
    }
}

fn token_ttl_or(key: &str, default: i64) -> Result<chrono::Duration> {
    token_ttl(key, parse_or(key, default)?)
}

fn token_ttl(key: &str, seconds: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_seconds(seconds).with_context(|| format!("{} is out of range", key))
}
