//! Auth domain - sessions and tokens for phone-verified users
//!
//! Responsibilities:
//! - Session issue, refresh-token rotation and revocation
//! - HS256 access tokens, verified without store access
//! - Login/logout actions tying OTP verification to the directory

pub mod actions;
pub mod authorization;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod refresh_token;
pub mod service;

pub use authorization::{bearer_token, ensure_same_session};
pub use errors::{AuthError, LoginError};
pub use jwt::{Claims, JwtService};
pub use refresh_token::RefreshToken;
pub use service::{SessionManager, Tokens};
