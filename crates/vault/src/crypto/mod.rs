//! Cryptographic primitives used by the envelope engine.
//!
//! This module is free of storage and I/O concerns. It provides:
//! - [`cipher`]: AES-256-GCM over item payloads, keyed by a one-time [`DataKey`].
//! - [`wrap`]: RSA-OAEP (SHA-256) wrapping of that data key.
//!
//! # Envelope layout
//!
//! ```text
//! iv           12 bytes, fresh per item
//! ciphertext   AES-256-GCM(plaintext, aad) || 16-byte tag
//! wrapped_key  RSA-OAEP-SHA256(data key), 256 bytes for a 2048-bit owner key
//! ```

pub mod cipher;
pub mod wrap;

use common::VaultError;

pub use cipher::{CipherError, DataKey, IV_LEN, KEY_LEN, TAG_LEN};
pub use wrap::{WrapError, WRAP_ALGORITHM};

impl From<CipherError> for VaultError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::AuthenticationFailure => VaultError::DecryptionFailure,
            other => VaultError::Crypto(other.to_string()),
        }
    }
}

impl From<WrapError> for VaultError {
    fn from(e: WrapError) -> Self {
        match e {
            WrapError::UnwrapFailure => VaultError::DecryptionFailure,
            WrapError::Wrap(msg) => VaultError::Crypto(msg),
        }
    }
}
