//! Collaborator contracts: where accounts and sealed items live.
//!
//! The core never sees how these are persisted. [`LocalStore`] implements both
//! for the CLI and for tests.

pub mod local;

pub use local::LocalStore;

use common::{
    AccountSummary, CredentialRecord, Envelope, ItemId, ItemSummary, ItemType, NewAccount,
    OwnerId, Role, StoredItem, VaultError,
};

/// Account lookup and registration.
#[cfg_attr(test, mockall::automock)]
pub trait UserDirectory: Send + Sync {
    /// Credential record for `username`, or `None` if no such account exists.
    fn find_credential(&self, username: &str) -> Result<Option<CredentialRecord>, VaultError>;

    /// Base64 SubjectPublicKeyInfo of the owner's public key.
    fn find_public_key(&self, owner_id: OwnerId) -> Result<Option<String>, VaultError>;

    /// Persist a new account and return its id.
    ///
    /// Fails with [`VaultError::InvalidInput`] if the username is taken.
    fn store_account(&self, account: NewAccount) -> Result<OwnerId, VaultError>;

    /// Replace the stored password hash. Returns `false` if the owner is unknown.
    fn update_password_hash(&self, owner_id: OwnerId, password_hash: &str)
        -> Result<bool, VaultError>;

    /// Every account, ordered by id.
    fn list_accounts(&self) -> Result<Vec<AccountSummary>, VaultError>;

    /// Returns `false` if the owner is unknown.
    fn update_role(&self, owner_id: OwnerId, role: Role) -> Result<bool, VaultError>;

    /// Remove the account record. Returns `false` if the owner is unknown.
    fn delete_account(&self, owner_id: OwnerId) -> Result<bool, VaultError>;
}

/// Sealed item persistence. Every lookup is scoped by owner.
#[cfg_attr(test, mockall::automock)]
pub trait ItemStore: Send + Sync {
    fn put(
        &self,
        owner_id: OwnerId,
        item_type: ItemType,
        envelope: &Envelope,
        title: &str,
        size: u64,
    ) -> Result<ItemId, VaultError>;

    /// The item, if it exists and belongs to `owner_id`.
    fn get(&self, item_id: ItemId, owner_id: OwnerId) -> Result<Option<StoredItem>, VaultError>;

    /// Metadata of the owner's items, newest first.
    fn list(&self, owner_id: OwnerId) -> Result<Vec<ItemSummary>, VaultError>;

    /// Returns `false` if no such item belongs to `owner_id`.
    fn delete(&self, item_id: ItemId, owner_id: OwnerId) -> Result<bool, VaultError>;

    /// Remove every item of `owner_id`, returning how many were removed.
    fn delete_all(&self, owner_id: OwnerId) -> Result<usize, VaultError>;
}
