//! RSA-OAEP wrapping of data keys.
//!
//! Only ever applied to a [`DataKey`], never to payload bytes. SHA-256 is used
//! for both the OAEP hash and MGF1.

use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::cipher::DataKey;

/// Algorithm identifier recorded next to every wrapped key.
pub const WRAP_ALGORITHM: &str = "RSA-OAEP";

/// Errors produced by the wrapping layer.
#[derive(Debug, Error)]
pub enum WrapError {
    /// Encryption under the public key failed.
    #[error("key wrap failed: {0}")]
    Wrap(String),

    /// Unwrapping failed. Padding errors, wrong keys and bad lengths all land
    /// here so the caller cannot tell them apart.
    #[error("key unwrap failed")]
    UnwrapFailure,
}

/// Wrap `key` under `public_key`.
pub fn wrap_key(key: &DataKey, public_key: &RsaPublicKey) -> Result<Vec<u8>, WrapError> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| WrapError::Wrap(e.to_string()))
}

/// Recover a data key wrapped with [`wrap_key`].
///
/// # Errors
///
/// Returns [`WrapError::UnwrapFailure`] for any failure, including a payload
/// that decrypts but is not exactly one data key long.
pub fn unwrap_key(wrapped: &[u8], private_key: &RsaPrivateKey) -> Result<DataKey, WrapError> {
    let raw = private_key
        .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), wrapped)
        .map(Zeroizing::new)
        .map_err(|_| WrapError::UnwrapFailure)?;
    DataKey::from_slice(&raw).map_err(|_| WrapError::UnwrapFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keypair, other_keypair};

    #[test]
    fn wrap_unwrap_round_trip() {
        let kp = keypair();
        let key = DataKey::generate().unwrap();
        let wrapped = wrap_key(&key, &kp.public_key).unwrap();
        // 2048-bit modulus.
        assert_eq!(wrapped.len(), 256);
        let recovered = unwrap_key(&wrapped, &kp.private_key).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn wrapping_is_randomised() {
        let kp = keypair();
        let key = DataKey::generate().unwrap();
        let a = wrap_key(&key, &kp.public_key).unwrap();
        let b = wrap_key(&key, &kp.public_key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_private_key_fails() {
        let key = DataKey::generate().unwrap();
        let wrapped = wrap_key(&key, &keypair().public_key).unwrap();
        assert!(matches!(
            unwrap_key(&wrapped, &other_keypair().private_key),
            Err(WrapError::UnwrapFailure)
        ));
    }

    #[test]
    fn tampered_wrapped_key_fails() {
        let kp = keypair();
        let key = DataKey::generate().unwrap();
        let mut wrapped = wrap_key(&key, &kp.public_key).unwrap();
        wrapped[100] ^= 0x01;
        assert!(matches!(
            unwrap_key(&wrapped, &kp.private_key),
            Err(WrapError::UnwrapFailure)
        ));
    }

    #[test]
    fn garbage_and_empty_input_fail_with_same_error() {
        let kp = keypair();
        let empty = unwrap_key(&[], &kp.private_key).unwrap_err();
        let short = unwrap_key(&[0u8; 10], &kp.private_key).unwrap_err();
        assert_eq!(empty.to_string(), short.to_string());
    }

    #[test]
    fn unwrapped_payload_of_wrong_length_is_rejected() {
        let kp = keypair();
        let wrapped = kp
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &[0u8; 16])
            .unwrap();
        assert!(matches!(
            unwrap_key(&wrapped, &kp.private_key),
            Err(WrapError::UnwrapFailure)
        ));
    }
}
