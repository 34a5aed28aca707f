//! Errors.
//!
//! Grounded on the teacher's `errors.rs`: a flat `thiserror`-derived enum,
//! one variant per failure category from spec.md §7, instead of a tree of
//! nested error types (the teacher's proxy has many more failure domains —
//! HBA, JWT, prepared statements — that this single-connection driver has no
//! use for).

/// Errors surfaced by the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error: {0}")]
    Io(String),

    #[error("protocol synchronization error: {0}")]
    ProtocolSync(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("server error ({code}): {message}")]
    Server {
        code: String,
        message: String,
        /// Set when the server status (or a lost connection) means the TCP
        /// connection itself must be closed, per spec.md §4.2's fatal-error
        /// classification — as opposed to an ordinary statement error
        /// (e.g. a constraint violation) that leaves the connection usable.
        fatal: bool,
    },

    #[error("connection is not in a state that allows this operation (state: {0:?})")]
    WrongState(crate::connection::ConnState),

    #[error("connect timed out: Timeout after {secs} seconds (state: {phase})")]
    ConnectTimeout { secs: u64, phase: &'static str },

    #[error("Query timed out")]
    QueryTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("{0} (query: {1})")]
    TransactionStatement(String, String),

    #[error("bad connect string: {0}")]
    BadConnectString(String),
}

impl Error {
    /// Whether this error invalidates the underlying TCP connection (spec.md
    /// §4.2 "fatal error detection"): the caller should close and, if it
    /// retries, do so against a freshly connected instance.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::ProtocolSync(_) | Error::NotConnected => true,
            Error::Server { fatal, .. } => *fatal,
            Error::QueryTimeout
            | Error::ConnectTimeout { .. }
            | Error::Auth(_)
            | Error::WrongState(_)
            | Error::TransactionStatement(_, _)
            | Error::BadConnectString(_) => false,
        }
    }
}
