//! AES-256-GCM encryption of item payloads under a one-time data key.
//!
//! **Nonce discipline:** every encryption draws a fresh 96-bit IV from the OS
//! CSPRNG. Each data key is used for exactly one item, so an IV is never
//! repeated under the same key.
//!
//! The 128-bit tag is appended to the ciphertext, as the `aead` crate does by
//! default.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Nonce, Payload},
    Aes256Gcm,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM IV (12 bytes = 96 bits).
pub const IV_LEN: usize = 12;

/// Byte length of the GCM authentication tag (16 bytes = 128 bits).
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The IV is the wrong length (must be [`IV_LEN`] bytes).
    #[error("invalid IV length: expected {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    /// The OS random source failed.
    #[error("random source unavailable")]
    RandomSource,

    /// AES-GCM encryption failed.
    #[error("aead encryption failed")]
    AeadFailure,

    /// The tag did not verify: wrong key, wrong IV, wrong AAD, or tampered data.
    #[error("authentication failed")]
    AuthenticationFailure,
}

/// One-time data encryption key.
///
/// Never cloned, never serialised. The bytes are overwritten with zeroes when
/// the value is dropped, which covers every exit path of the code holding it.
pub struct DataKey(Box<[u8; KEY_LEN]>);

impl DataKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Result<Self, CipherError> {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng
            .try_fill_bytes(&mut buf[..])
            .map_err(|_| CipherError::RandomSource)?;
        Ok(Self(buf))
    }

    /// Copy key material out of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.0[..].zeroize();
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("DataKey([REDACTED])")
    }
}

/// Draw a fresh random IV.
pub fn generate_iv() -> Result<[u8; IV_LEN], CipherError> {
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|_| CipherError::RandomSource)?;
    Ok(iv)
}

/// Encrypt `plaintext` under `key` and `iv`, authenticating `aad`.
///
/// Returns ciphertext with the tag appended (`plaintext.len() + TAG_LEN` bytes).
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] or [`CipherError::InvalidIvLength`]
/// on malformed inputs, [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    let nonce = checked_nonce(iv)?;
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CipherError::AeadFailure)
}

/// Decrypt and authenticate `ciphertext` (with trailing tag).
///
/// No plaintext is released unless the tag verifies.
///
/// # Errors
///
/// Returns [`CipherError::AuthenticationFailure`] if the tag does not verify.
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let cipher = build_cipher(key)?;
    let nonce = checked_nonce(iv)?;
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| CipherError::AuthenticationFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))
}

fn checked_nonce(iv: &[u8]) -> Result<&Nonce<Aes256Gcm>, CipherError> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidIvLength(iv.len()));
    }
    Ok(Nonce::<Aes256Gcm>::from_slice(iv))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AAD: &[u8] = b"userId=1;type=file";

    fn fresh() -> (DataKey, [u8; IV_LEN]) {
        (DataKey::generate().unwrap(), generate_iv().unwrap())
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (key, iv) = fresh();
        let ct = encrypt(b"123-45-6789", key.as_bytes(), &iv, AAD).unwrap();
        let pt = decrypt(&ct, key.as_bytes(), &iv, AAD).unwrap();
        assert_eq!(pt.as_slice(), b"123-45-6789");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let (key, iv) = fresh();
        let ct = encrypt(b"", key.as_bytes(), &iv, AAD).unwrap();
        assert_eq!(ct.len(), TAG_LEN);
        let pt = decrypt(&ct, key.as_bytes(), &iv, AAD).unwrap();
        assert!(pt.is_empty());
    }

    #[test]
    fn tag_is_appended() {
        let (key, iv) = fresh();
        let ct = encrypt(&[7u8; 100], key.as_bytes(), &iv, AAD).unwrap();
        assert_eq!(ct.len(), 100 + TAG_LEN);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let (key, iv) = fresh();
        let other = DataKey::generate().unwrap();
        let ct = encrypt(b"secret", key.as_bytes(), &iv, AAD).unwrap();
        assert!(matches!(
            decrypt(&ct, other.as_bytes(), &iv, AAD),
            Err(CipherError::AuthenticationFailure)
        ));
    }

    #[test]
    fn wrong_aad_fails_decryption() {
        let (key, iv) = fresh();
        let ct = encrypt(b"secret", key.as_bytes(), &iv, AAD).unwrap();
        assert!(matches!(
            decrypt(&ct, key.as_bytes(), &iv, b"userId=1;type=note"),
            Err(CipherError::AuthenticationFailure)
        ));
    }

    #[test]
    fn wrong_iv_fails_decryption() {
        let (key, mut iv) = fresh();
        let ct = encrypt(b"secret", key.as_bytes(), &iv, AAD).unwrap();
        iv[0] ^= 0x01;
        assert!(matches!(
            decrypt(&ct, key.as_bytes(), &iv, AAD),
            Err(CipherError::AuthenticationFailure)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let (key, iv) = fresh();
        let mut ct = encrypt(b"tamper me", key.as_bytes(), &iv, AAD).unwrap();
        // Flip a byte in the ciphertext to simulate tampering.
        ct[0] ^= 0xFF;
        assert!(decrypt(&ct, key.as_bytes(), &iv, AAD).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails_auth() {
        let (key, iv) = fresh();
        let ct = encrypt(b"abc", key.as_bytes(), &iv, AAD).unwrap();
        assert!(decrypt(&ct[..ct.len() - 1], key.as_bytes(), &iv, AAD).is_err());
        assert!(decrypt(&[], key.as_bytes(), &iv, AAD).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let iv = generate_iv().unwrap();
        assert!(matches!(
            encrypt(b"x", &[0u8; 16], &iv, AAD),
            Err(CipherError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn invalid_iv_length_rejected() {
        let key = DataKey::generate().unwrap();
        assert!(matches!(
            encrypt(b"x", key.as_bytes(), &[0u8; 16], AAD),
            Err(CipherError::InvalidIvLength(16))
        ));
        assert!(matches!(
            decrypt(&[0u8; 32], key.as_bytes(), &[0u8; 8], AAD),
            Err(CipherError::InvalidIvLength(8))
        ));
    }

    #[test]
    fn data_key_from_slice_checks_length() {
        assert!(DataKey::from_slice(&[0u8; KEY_LEN]).is_ok());
        assert!(matches!(
            DataKey::from_slice(&[0u8; 31]),
            Err(CipherError::InvalidKeyLength(31))
        ));
    }

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate().unwrap();
        let b = DataKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn aes_key_schedule_is_wiped_on_drop() {
        fn wiped_on_drop<T: zeroize::ZeroizeOnDrop>() {}
        wiped_on_drop::<aes::Aes256>();
    }

    #[test]
    fn data_key_redacted_in_debug() {
        let key = DataKey::from_slice(&[0xFFu8; KEY_LEN]).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("255"));
    }
}
