use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 keyed by a server secret.
///
/// Used for OTP challenge digests and refresh-token digests; the raw values
/// are never stored.
#[derive(Clone)]
pub struct DigestKey {
    mac: HmacSha256,
}

impl DigestKey {
    pub fn new(secret: &[u8]) -> Self {
        let mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
        Self { mac }
    }

    pub fn digest(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time check that `expected` is the digest of `message`.
    pub fn verify(&self, message: &[u8], expected: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.verify_slice(expected).is_ok()
    }
}

impl fmt::Debug for DigestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DigestKey(..)")
    }
}

/// SHA-256 of a phone number, hex encoded.
///
/// Logs carry this instead of the raw number.
pub fn hash_phone_number(phone_number: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone_number.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short prefix of [`hash_phone_number`] for log fields.
pub fn phone_log_tag(phone_number: &str) -> String {
    let mut hash = hash_phone_number(phone_number);
    hash.truncate(12);
    hash
}
