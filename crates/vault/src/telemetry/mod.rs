//! Structured logging for the `vault` binary.
//!
//! # Logging invariants
//!
//! - **No secrets** in any log field: no key material, plaintext, password or
//!   password hash. Public keys are referred to by fingerprint.
//! - Output goes to stderr; stdout is reserved for command results.
//! - Log level comes from `VAULT_LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   overrides it.

pub mod init;

pub use init::init_telemetry;
