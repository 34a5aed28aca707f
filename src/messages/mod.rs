//! Frontend/backend protocol messages: constants, wire encode/decode, and
//! client-side SASL (SCRAM-SHA-256) authentication.

pub mod constants;
pub mod scram;
pub mod wire;

pub use constants::*;
pub use wire::*;
