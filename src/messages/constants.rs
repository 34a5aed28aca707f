//! Wire-level constants for the PostgreSQL frontend/backend protocol.

/// Protocol version 3.0, as sent in the StartupMessage.
pub const PROTOCOL_VERSION: i32 = 196_608;

/// AuthenticationOk.
pub const AUTHENTICATION_SUCCESSFUL: i32 = 0;
/// AuthenticationCleartextPassword.
pub const AUTHENTICATION_CLEAR_PASSWORD: i32 = 3;
/// AuthenticationMD5Password.
pub const MD5_ENCRYPTED_PASSWORD: i32 = 5;
/// AuthenticationSASL.
pub const SASL: i32 = 10;
/// AuthenticationSASLContinue.
pub const SASL_CONTINUE: i32 = 11;
/// AuthenticationSASLFinal.
pub const SASL_FINAL: i32 = 12;

/// SASL mechanism name this driver offers.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Byte that terminates a null-terminated field list (e.g. ErrorResponse).
pub const MESSAGE_TERMINATOR: u8 = 0;

/// Backend message type bytes.
pub mod backend {
    pub const AUTHENTICATION: u8 = b'R';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Frontend message type bytes.
pub mod frontend {
    pub const QUERY: u8 = b'Q';
    pub const PASSWORD: u8 = b'p';
    pub const TERMINATE: u8 = b'X';
}

/// `ReadyForQuery` transaction status bytes.
pub mod txn_status {
    pub const IDLE: u8 = b'I';
    pub const IN_TRANSACTION: u8 = b'T';
    pub const FAILED: u8 = b'E';
}

/// Default timeouts, overridable via `DriverConfig`.
pub const SQL_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const SQL_QUERY_TIMEOUT_SECS: u64 = 60;

/// Connect-phase labels used in timeout diagnostics (spec.md glossary).
pub const PHASE_CONNECTING: &str = "connecting";
pub const PHASE_WAIT_FOR_WRITE: &str = "wait for output";
pub const PHASE_WAIT_FOR_READ: &str = "wait for input";
pub const PHASE_CONNECTED: &str = "connected";
