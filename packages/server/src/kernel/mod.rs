//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod postgres;
pub mod redis_store;
pub mod test_dependencies;
pub mod traits;

pub use deps::{ServerDeps, SystemClock, TwilioAdapter};
pub use postgres::{PgIdentityTransaction, PgSessionStore, PgUnitOfWork};
pub use redis_store::RedisChallengeStore;
pub use test_dependencies::TestDependencies;
pub use traits::*;
