// Common types and utilities shared across the application

pub mod crypto;
pub mod entity_ids;
pub mod id;

pub use crypto::{hash_phone_number, phone_log_tag, DigestKey};
pub use entity_ids::{DeviceId, SessionId, UserId};
pub use id::{Id, V4, V7};
