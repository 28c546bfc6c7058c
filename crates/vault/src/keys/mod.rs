//! Owner keypair lifecycle: generation, public-key encoding, private-key storage.
//!
//! # Lifecycle
//!
//! 1. At registration, [`generate_keypair`] creates a 2048-bit RSA keypair.
//! 2. The public half is encoded with [`encode_public_key`] (Base64 of the
//!    SubjectPublicKeyInfo DER) and stored in the user directory.
//! 3. The private half is written once by [`PrivateKeyStore::save`] as PKCS#8
//!    DER into a per-owner file, and read back by [`PrivateKeyStore::load`]
//!    for every decryption.
//!
//! # Security invariants
//!
//! - The private key is never sent to the user directory or item store.
//! - Key material never appears in logs; public keys are referred to by
//!   [`fingerprint`].

pub mod store;

pub use store::PrivateKeyStore;

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use common::VaultError;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// RSA modulus size for owner keypairs.
pub const KEY_BITS: usize = 2048;

/// Errors produced by the key layer.
#[derive(Debug, Error)]
pub enum KeyError {
    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// Key bytes could not be encoded or decoded.
    #[error("malformed key: {0}")]
    Format(String),

    /// No private key file exists for the owner.
    #[error("no private key stored for {0}")]
    NotFound(String),

    /// A private key file already exists for the owner; keys are never rewritten.
    #[error("a private key already exists for {0}")]
    AlreadyExists(String),

    /// The owner identifier cannot be used as a file name.
    #[error("invalid key owner identifier: {0:?}")]
    InvalidOwner(String),

    #[error("key storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KeyError> for VaultError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::NotFound(owner) => VaultError::KeyNotFound(owner),
            KeyError::Format(msg) => VaultError::KeyFormat(msg),
            KeyError::Generation(msg) => VaultError::Crypto(msg),
            KeyError::AlreadyExists(owner) => {
                VaultError::InvalidInput(format!("a private key already exists for {owner}"))
            }
            KeyError::InvalidOwner(owner) => {
                VaultError::InvalidInput(format!("invalid username {owner:?}"))
            }
            KeyError::Io(io) => VaultError::Storage(io.to_string()),
        }
    }
}

/// An owner's RSA keypair.
pub struct Keypair {
    pub public_key: RsaPublicKey,
    pub private_key: RsaPrivateKey,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &fingerprint(&self.public_key).unwrap_or_default())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh [`KEY_BITS`]-bit RSA keypair from the OS CSPRNG.
pub fn generate_keypair() -> Result<Keypair, KeyError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    debug!(bits = KEY_BITS, "generated owner keypair");
    Ok(Keypair {
        public_key,
        private_key,
    })
}

/// Encode a public key as Base64 of its SubjectPublicKeyInfo DER.
pub fn encode_public_key(public_key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| KeyError::Format(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Inverse of [`encode_public_key`]. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`KeyError::Format`] if the text is not Base64 or the bytes are not
/// an RSA SubjectPublicKeyInfo.
pub fn decode_public_key(encoded: &str) -> Result<RsaPublicKey, KeyError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| KeyError::Format(format!("public key is not valid base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| KeyError::Format(format!("public key is not valid SPKI DER: {e}")))
}

/// Short, log-safe identifier of a public key: the first 16 characters of the
/// URL-safe Base64 SHA-256 of its DER encoding.
pub fn fingerprint(public_key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| KeyError::Format(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(16);
    Ok(encoded)
}
