//! Password hashing and login verification.
//!
//! A login attempt moves through
//! `Start -> HashLookup -> SchemeDispatch -> {Argon2Verify | LegacyVerify}`
//! and ends either accepted, with a flag saying whether the stored hash is a
//! legacy bcrypt hash that should be replaced, or rejected with one of the
//! credential error kinds.
//!
//! The password attempt is borrowed for the whole walk and never copied into
//! a buffer owned here; callers hold it in a `Zeroizing` container.

use argon2::{
    password_hash::{
        self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use common::{CredentialRecord, HashScheme, VaultError};
use tracing::{debug, warn};

use crate::store::UserDirectory;

/// Argon2id cost parameters used for new hashes.
///
/// Verification always uses the parameters encoded in the stored hash, so
/// changing these only affects hashes written afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Settings {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for Argon2Settings {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl Argon2Settings {
    fn hasher(&self) -> Result<Argon2<'static>, VaultError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| VaultError::Crypto(format!("invalid argon2 parameters: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash `password` as a PHC-encoded Argon2id string with a fresh random salt.
pub fn hash_password(password: &[u8], settings: &Argon2Settings) -> Result<String, VaultError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = settings
        .hasher()?
        .hash_password(password, &salt)
        .map_err(|e| VaultError::Crypto(format!("argon2 hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// A successful password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// The stored hash is legacy bcrypt and should be replaced by an Argon2id
    /// hash of the password that was just verified.
    pub needs_migration: bool,
}

/// Check `password` against `stored_hash`, dispatching on the hash prefix.
///
/// # Errors
///
/// - [`VaultError::InvalidHashFormat`] if the prefix is not recognised or the
///   hash cannot be parsed.
/// - [`VaultError::AuthFailed`] if the password does not match.
pub fn check_password(stored_hash: &str, password: &[u8]) -> Result<Accepted, VaultError> {
    match HashScheme::detect(stored_hash) {
        Some(HashScheme::Argon2id) => {
            let parsed = PasswordHash::new(stored_hash).map_err(|e| {
                debug!(error = %e, "argon2 hash does not parse");
                VaultError::InvalidHashFormat
            })?;
            if parsed.salt.is_none() || parsed.hash.is_none() {
                debug!("argon2 hash is missing its salt or digest");
                return Err(VaultError::InvalidHashFormat);
            }
            match Argon2::default().verify_password(password, &parsed) {
                Ok(()) => Ok(Accepted {
                    needs_migration: false,
                }),
                Err(password_hash::Error::Password) => Err(VaultError::AuthFailed),
                Err(e) => {
                    debug!(error = %e, "argon2 hash rejected");
                    Err(VaultError::InvalidHashFormat)
                }
            }
        }
        Some(HashScheme::LegacyBcrypt) => match bcrypt::verify(password, stored_hash) {
            Ok(true) => Ok(Accepted {
                needs_migration: true,
            }),
            Ok(false) => Err(VaultError::AuthFailed),
            Err(e) => {
                debug!(error = %e, "bcrypt hash rejected");
                Err(VaultError::InvalidHashFormat)
            }
        },
        None => Err(VaultError::InvalidHashFormat),
    }
}

/// Outcome of an accepted login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub record: CredentialRecord,
    pub needs_migration: bool,
}

/// Run one login attempt against `directory`.
///
/// # Errors
///
/// [`VaultError::EmptyCredentials`], [`VaultError::UserNotFound`],
/// [`VaultError::InvalidHashFormat`] or [`VaultError::AuthFailed`], plus
/// whatever the directory itself returns.
pub fn verify_login<D>(
    directory: &D,
    username: &str,
    password: &[u8],
) -> Result<LoginOutcome, VaultError>
where
    D: UserDirectory + ?Sized,
{
    if username.trim().is_empty() || password.is_empty() {
        return Err(VaultError::EmptyCredentials);
    }

    let record = directory
        .find_credential(username)?
        .ok_or(VaultError::UserNotFound)?;

    let accepted = check_password(&record.stored_hash, password).map_err(|e| {
        match e {
            VaultError::InvalidHashFormat => warn!(
                owner_id = record.owner_id,
                "stored password hash has an unrecognised format"
            ),
            _ => debug!(owner_id = record.owner_id, "password rejected"),
        }
        e
    })?;

    debug!(
        owner_id = record.owner_id,
        needs_migration = accepted.needs_migration,
        "password accepted"
    );
    Ok(LoginOutcome {
        record,
        needs_migration: accepted.needs_migration,
    })
}
