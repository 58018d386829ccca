use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::errors::OtpError;
use crate::common::{phone_log_tag, DigestKey};
use crate::kernel::{BaseChallengeStore, BaseSmsGateway, SmsError};

pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_CODE_LEN: usize = 12;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

const CODE_SPACE: u32 = 1_000_000;

/// Issues and verifies one-time SMS codes.
///
/// The store only ever holds `HMAC(otp_secret, code)` under `otp:<phone>`;
/// the code itself exists in memory just long enough to be sent.
pub struct ChallengeManager {
    store: Arc<dyn BaseChallengeStore>,
    gateway: Arc<dyn BaseSmsGateway>,
    key: DigestKey,
    ttl: Duration,
    delivery_timeout: Duration,
}

impl ChallengeManager {
    pub fn new(
        store: Arc<dyn BaseChallengeStore>,
        gateway: Arc<dyn BaseSmsGateway>,
        otp_secret: &[u8],
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            key: DigestKey::new(otp_secret),
            ttl,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Generate a code for `phone`, store its digest and text it.
    ///
    /// Any earlier challenge for the same phone is replaced. If delivery
    /// fails the digest is removed again so no undeliverable challenge lingers.
    pub async fn request_challenge(&self, phone: &str) -> Result<(), OtpError> {
        let phone = normalize_phone(phone)?;
        let key = challenge_key(phone);
        let code = generate_code();
        let digest = hex::encode(self.key.digest(code.as_bytes()));

        self.store
            .set(&key, &digest, self.ttl)
            .await
            .map_err(OtpError::Store)?;

        let text = challenge_message(&code, self.ttl);
        let delivery =
            tokio::time::timeout(self.delivery_timeout, self.gateway.send_sms(phone, &text)).await;

        let failure = match delivery {
            Ok(Ok(())) => {
                info!(phone = %phone_log_tag(phone), "Verification code sent");
                return Ok(());
            }
            Ok(Err(SmsError::Unavailable(reason))) => {
                warn!(phone = %phone_log_tag(phone), %reason, "SMS gateway unavailable");
                OtpError::DeliveryUnavailable
            }
            Ok(Err(SmsError::Failed(e))) => {
                error!(
                    phone = %phone_log_tag(phone),
                    error = %e,
                    "Failed to send verification code"
                );
                OtpError::DeliveryFailed(e)
            }
            Err(_) => {
                warn!(
                    phone = %phone_log_tag(phone),
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "SMS gateway timed out"
                );
                OtpError::DeliveryUnavailable
            }
        };

        if let Err(e) = self.store.delete(&key).await {
            error!(
                phone = %phone_log_tag(phone),
                error = %e,
                "Failed to discard undelivered challenge"
            );
        }
        Err(failure)
    }

    /// Check `code` against the live challenge for `phone`.
    ///
    /// Returns `false` both for a wrong code and for a missing or expired
    /// challenge. A matching code consumes the challenge; a wrong one leaves
    /// it in place. Of concurrent calls with the right code only the one whose
    /// delete removed the entry succeeds.
    pub async fn verify_challenge(&self, phone: &str, code: &str) -> Result<bool, OtpError> {
        let phone = normalize_phone(phone)?;
        let code = normalize_code(code)?;
        let key = challenge_key(phone);

        let Some(stored) = self.store.get(&key).await.map_err(OtpError::Store)? else {
            debug!(phone = %phone_log_tag(phone), "No live challenge");
            return Ok(false);
        };

        // Undecodable entries can only mismatch
        let stored = hex::decode(stored.trim()).unwrap_or_default();
        if !self.key.verify(code.as_bytes(), &stored) {
            debug!(phone = %phone_log_tag(phone), "Verification code mismatch");
            return Ok(false);
        }

        if !self.store.delete(&key).await.map_err(OtpError::Store)? {
            debug!(phone = %phone_log_tag(phone), "Challenge consumed concurrently");
            return Ok(false);
        }
        info!(phone = %phone_log_tag(phone), "Verification code accepted");
        Ok(true)
    }
}

fn challenge_key(phone: &str) -> String {
    format!("otp:{}", phone)
}

fn normalize_phone(phone: &str) -> Result<&str, OtpError> {
    let phone = phone.trim();
    if phone.is_empty() || phone.len() > MAX_PHONE_LEN {
        return Err(OtpError::BadInput("phone"));
    }
    Ok(phone)
}

fn normalize_code(code: &str) -> Result<&str, OtpError> {
    let code = code.trim();
    if code.is_empty() || code.len() > MAX_CODE_LEN {
        return Err(OtpError::BadInput("code"));
    }
    Ok(code)
}

/// Uniform over `000000..=999999`
fn generate_code() -> String {
    let n = OsRng.gen_range(0..CODE_SPACE);
    format!("{:06}", n)
}

fn challenge_message(code: &str, ttl: Duration) -> String {
    let minutes = (ttl.as_secs() / 60).max(1);
    format!("Verification code: {}. Valid for {} min.", code, minutes)
}
