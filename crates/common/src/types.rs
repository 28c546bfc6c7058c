//! Records exchanged between the vault core and its collaborators.
//!
//! These types are serialised as JSON by the local store. Binary fields are
//! encoded as standard Base64 strings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an account in the user directory.
pub type OwnerId = u64;

/// Identifier of an item in the item store.
pub type ItemId = u64;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Category of a stored item. Part of the associated data bound into every
/// ciphertext, so an item cannot be re-labelled after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Note,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Note => "note",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sealed form of one item: AEAD ciphertext plus the wrapped data key.
///
/// Produced whole by sealing and consumed whole by opening. Nothing in here
/// identifies the owner or the item type; those are asserted by the caller at
/// open time and checked through the associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// 12-byte AES-GCM nonce.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// Ciphertext with the 16-byte tag appended.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Data key wrapped under the owner's public key.
    #[serde(with = "b64")]
    pub wrapped_key: Vec<u8>,
    /// Identifier of the wrapping scheme, e.g. `"RSA-OAEP"`.
    pub wrap_algorithm: String,
}

/// Item metadata as returned by listings. Carries no ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub owner_id: OwnerId,
    pub title: String,
    pub item_type: ItemType,
    /// Plaintext size in bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// A full stored item: metadata plus its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    #[serde(flatten)]
    pub summary: ItemSummary,
    pub envelope: Envelope,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Account role. Item operations ignore it; the administrative operations
/// require [`Role::Admin`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory entry as shown to an administrator. Carries no hash and no key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub owner_id: OwnerId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Password hashing scheme, inferred from the stored hash's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// PHC string starting with `$argon2id$`.
    Argon2id,
    /// Modular-crypt bcrypt string (`$2a$`, `$2b$`, `$2x$`, `$2y$`).
    LegacyBcrypt,
}

impl HashScheme {
    /// Infer the scheme from a stored hash, or `None` if the prefix is unknown.
    pub fn detect(stored_hash: &str) -> Option<Self> {
        if stored_hash.starts_with("$argon2id$") {
            return Some(HashScheme::Argon2id);
        }
        const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];
        if BCRYPT_PREFIXES.iter().any(|p| stored_hash.starts_with(p)) {
            return Some(HashScheme::LegacyBcrypt);
        }
        None
    }
}

/// What the user directory returns for a username at login time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub owner_id: OwnerId,
    pub username: String,
    pub stored_hash: String,
    #[serde(default)]
    pub role: Role,
}

impl CredentialRecord {
    pub fn scheme(&self) -> Option<HashScheme> {
        HashScheme::detect(&self.stored_hash)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("owner_id", &self.owner_id)
            .field("username", &self.username)
            .field("stored_hash", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

/// Account fields persisted at registration.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    /// Base64 SubjectPublicKeyInfo DER.
    pub public_key: String,
    pub role: Role,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// An authenticated user, passed explicitly into every item operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub owner_id: OwnerId,
    pub username: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ---------------------------------------------------------------------------
// Base64 serde helper
// ---------------------------------------------------------------------------

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
