//! Envelope engine: turns plaintext into a storable [`Envelope`] for an owner,
//! and back.
//!
//! Each seal draws a fresh data key and IV, encrypts under AES-256-GCM with
//! associated data bound to `(owner_id, item_type)`, and wraps the data key
//! under the owner's RSA public key. The data key is a [`DataKey`], zeroed on
//! drop, so it is wiped on every return path including errors.
//!
//! Opening recomputes the associated data from what the *caller* asserts the
//! owner and item type to be. Nothing in the envelope names its owner, so a
//! caller presenting the wrong context fails authentication.

use common::{Envelope, ItemType, OwnerId, VaultError};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{cipher, wrap, DataKey, WRAP_ALGORITHM};

/// Associated data binding a ciphertext to its owner and category.
pub fn associated_data(owner_id: OwnerId, item_type: ItemType) -> Vec<u8> {
    format!("userId={owner_id};type={item_type}").into_bytes()
}

/// Seal `plaintext` for `owner_id` under `owner_public_key`.
///
/// # Errors
///
/// Returns [`VaultError::Crypto`] if any step fails. No partial envelope is
/// ever returned.
pub fn seal(
    plaintext: &[u8],
    owner_public_key: &RsaPublicKey,
    owner_id: OwnerId,
    item_type: ItemType,
) -> Result<Envelope, VaultError> {
    let key = DataKey::generate()?;
    let iv = cipher::generate_iv()?;
    let aad = associated_data(owner_id, item_type);

    let ciphertext = cipher::encrypt(plaintext, key.as_bytes(), &iv, &aad)?;
    let wrapped_key = wrap::wrap_key(&key, owner_public_key)?;
    drop(key);

    debug!(owner_id, %item_type, size = plaintext.len(), "item sealed");
    Ok(Envelope {
        iv: iv.to_vec(),
        ciphertext,
        wrapped_key,
        wrap_algorithm: WRAP_ALGORITHM.to_owned(),
    })
}

/// Open `envelope` with `owner_private_key`, asserting it belongs to
/// `owner_id` and is of `item_type`.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailure`] for every failure: unknown wrap
/// algorithm, unwrap failure, wrong IV length, or a tag that does not verify.
pub fn open(
    envelope: &Envelope,
    owner_private_key: &RsaPrivateKey,
    owner_id: OwnerId,
    item_type: ItemType,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if envelope.wrap_algorithm != WRAP_ALGORITHM {
        warn!(owner_id, algorithm = %envelope.wrap_algorithm, "unsupported wrap algorithm");
        return Err(VaultError::DecryptionFailure);
    }
    let aad = associated_data(owner_id, item_type);

    let key = wrap::unwrap_key(&envelope.wrapped_key, owner_private_key).map_err(|_| {
        debug!(owner_id, %item_type, "data key unwrap failed");
        VaultError::DecryptionFailure
    })?;

    cipher::decrypt(&envelope.ciphertext, key.as_bytes(), &envelope.iv, &aad).map_err(|e| {
        debug!(owner_id, %item_type, error = %e, "payload authentication failed");
        VaultError::DecryptionFailure
    })
}
