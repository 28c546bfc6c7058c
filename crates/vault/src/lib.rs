//! Personal encrypted vault.
//!
//! Items are sealed with envelope encryption: a one-time AES-256-GCM data key
//! per item, bound to its owner and item type through associated data, and
//! wrapped under the owner's RSA-2048 public key with RSA-OAEP (SHA-256).
//! Private keys live in per-user PKCS#8 files; passwords are verified against
//! Argon2id hashes, with legacy bcrypt hashes accepted and migrated on login.

pub mod cli;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod envelope;
pub mod keys;
pub mod service;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use service::Vault;
