//! Utility types and functions shared across the proposer.
//!
//! - [`b64`] - Base64 encoding/decoding utilities
//! - [`amount`] - Wei-scale decimal amount parsing
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Structured logging setup

pub mod amount;
pub mod b64;
pub mod sig_down;
pub mod telemetry;

pub use amount::Amount;
pub use b64::Base64Bytes;
pub use sig_down::SigDown;
