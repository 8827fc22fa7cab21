//! Supporting infrastructure.
//!
//! Error types with fail-level logging and clock arithmetic for packet
//! timestamps.

pub mod errors;
pub mod timing;
