//! OTP domain - one-time SMS codes keyed by phone number
//!
//! Responsibilities:
//! - Code generation and delivery through the SMS gateway
//! - Digest-only storage with store-enforced expiry
//! - Single-use, constant-time verification

mod errors;
mod service;

pub use errors::OtpError;
pub use service::{ChallengeManager, DEFAULT_DELIVERY_TIMEOUT, MAX_CODE_LEN, MAX_PHONE_LEN};
