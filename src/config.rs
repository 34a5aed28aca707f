//! Driver-level configuration.
//!
//! Grounded on the teacher's `config::General`: a small, `Default`-able,
//! typed config struct rather than scattered constants, even though this
//! driver has far fewer knobs than a full pooler.

use std::time::Duration;

use crate::messages::constants::{SQL_CONNECT_TIMEOUT_SECS, SQL_QUERY_TIMEOUT_SECS};

/// Tunables for one [`crate::connection::Connection`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Deadline for the TCP connect + authentication handshake, armed
    /// *after* the TCP handshake completes (DNS/connect time is logged but
    /// not charged against this timeout, per spec.md §4.2).
    pub connect_timeout: Duration,
    /// Deadline for each dispatched query, from `send` through the final
    /// `ReadyForQuery`.
    pub query_timeout: Duration,
    /// Application name reported in the StartupMessage.
    pub application_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            connect_timeout: Duration::from_secs(SQL_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(SQL_QUERY_TIMEOUT_SECS),
            application_name: "pgsql-driver".to_string(),
        }
    }
}
