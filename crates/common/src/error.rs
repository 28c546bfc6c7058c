//! Common error types shared across crates.

use thiserror::Error;

/// Top-level vault error type.
///
/// The `Display` text is meant for logs. Anything crossing an untrusted
/// boundary (CLI output, UI) should use [`VaultError::public_message`], which
/// folds the credential and decryption kinds together:
/// - [`VaultError::UserNotFound`], [`VaultError::AuthFailed`],
///   [`VaultError::InvalidHashFormat`] → "invalid credentials"
/// - [`VaultError::DecryptionFailure`], [`VaultError::KeyNotFound`] → "cannot access item"
#[derive(Debug, Error)]
pub enum VaultError {
    /// Username or password attempt was empty.
    #[error("empty credentials")]
    EmptyCredentials,

    /// No credential record exists for the username.
    #[error("user not found")]
    UserNotFound,

    /// The stored password hash carries no recognised scheme prefix, or could not be parsed.
    #[error("stored password hash has an unrecognised format")]
    InvalidHashFormat,

    /// The password attempt did not match the stored hash.
    #[error("authentication failed")]
    AuthFailed,

    /// No key material exists for the given owner.
    #[error("key not found for {0}")]
    KeyNotFound(String),

    /// Key material exists but could not be decoded.
    #[error("malformed key: {0}")]
    KeyFormat(String),

    /// Encryption-side failure: bad key or IV length, RNG or key generation failure.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Opening an envelope failed. Covers unwrap and AEAD tag failures alike.
    #[error("decryption failed")]
    DecryptionFailure,

    /// The item does not exist or is not owned by the caller.
    #[error("item {0} not found")]
    ItemNotFound(u64),

    /// The session's role does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Caller-supplied input was rejected before any crypto ran.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The user directory or item store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl VaultError {
    /// Short machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::EmptyCredentials => "empty_credentials",
            VaultError::UserNotFound | VaultError::AuthFailed | VaultError::InvalidHashFormat => {
                "invalid_credentials"
            }
            VaultError::KeyNotFound(_) | VaultError::DecryptionFailure => "access_denied",
            VaultError::ItemNotFound(_) => "not_found",
            VaultError::InvalidInput(_) => "bad_request",
            VaultError::Forbidden(_) => "forbidden",
            VaultError::KeyFormat(_) | VaultError::Crypto(_) | VaultError::Storage(_) => {
                "internal_error"
            }
        }
    }

    /// Message safe to show to an end user. Never includes internal detail.
    pub fn public_message(&self) -> &'static str {
        match self.code() {
            "empty_credentials" => "username and password are required",
            "invalid_credentials" => "invalid credentials",
            "access_denied" => "cannot access item",
            "not_found" => "item not found",
            "bad_request" => "invalid request",
            "forbidden" => "operation not permitted",
            _ => "internal error",
        }
    }

    /// Returns `true` for the kinds that mean "the login attempt was refused".
    pub fn is_credential_failure(&self) -> bool {
        self.code() == "invalid_credentials"
    }
}
