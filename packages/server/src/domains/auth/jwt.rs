use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::AuthError;
use crate::common::{DeviceId, SessionId, UserId};

/// JWT Claims - data stored in the access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub uid: UserId,    // User UUID
    pub did: DeviceId,  // Device UUID
    pub sid: SessionId, // Session the token was minted for
    pub sub: String,    // Subject (uid as string)
    pub iat: i64,       // Issued at timestamp
    pub exp: i64,       // Expiration timestamp
}

/// JWT Service - signs and verifies HS256 access tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
}

impl JwtService {
    pub fn new(secret: &[u8], ttl: chrono::Duration) -> Self {
        // Only HS256 is accepted; `none`, other HMAC sizes and asymmetric
        // algorithms fail before the signature is looked at.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        // Expiry is checked against the injected clock in `verify_token`
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Sign an access token for a session, valid from `now` for the configured TTL
    pub fn create_token(
        &self,
        user_id: UserId,
        device_id: DeviceId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("access TTL out of range")))?;

        let claims = Claims {
            uid: user_id,
            did: device_id,
            sid: session_id,
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(e.into()))?;
        Ok((token, expires_at))
    }

    /// Verify signature, algorithm and expiry; no store access
    pub fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Access token rejected");
                AuthError::InvalidToken
            })?;

        if now.timestamp() >= claims.exp {
            debug!(session_id = %claims.sid, "Access token expired");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}
