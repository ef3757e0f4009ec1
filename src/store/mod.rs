//! Persistence layer: libSQL-backed storage for onboarding sessions,
//! consent, audit log, profiles and owned assets.

pub mod libsql_backend;
pub mod migrations;
pub mod retry;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use retry::ReadRetry;
pub use traits::{Database, LinkOutcome};
