//! Auth domain actions - business logic functions
//!
//! Actions compose the OTP and session services with the directory and are
//! what a transport layer calls.

mod login;
mod logout;

pub use login::{login, LoginRequest, LoginResult};
pub use logout::logout;
