// Phone Auth Core
//
// OTP challenges over SMS plus refresh-token sessions and HS256 access tokens.
// Domains hold the rules; kernel/ holds the infrastructure traits and their
// Postgres, Redis and Twilio implementations.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
