//! Typed ID definitions for the auth entities.
//!
//! All three use random (v4) UUIDs. Session ids in particular appear in
//! client-held refresh tokens and must not be predictable.

use super::id::{Id, V4};

/// Marker type for users (one per phone number).
pub struct User;

/// Marker type for a user's devices.
pub struct Device;

/// Marker type for login sessions.
pub struct Session;

pub type UserId = Id<User, V4>;

pub type DeviceId = Id<Device, V4>;

pub type SessionId = Id<Session, V4>;
