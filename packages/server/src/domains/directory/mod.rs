//! Directory domain - users and their devices, keyed by phone number
//!
//! Only the persistence lives here; the login action resolves identities
//! through `BaseIdentityTransaction` so the upsert shares a commit with the
//! new session.

pub mod models;

pub use models::{Device, User};
