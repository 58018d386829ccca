// Business domains
pub mod auth;
pub mod directory;
pub mod otp;
