//! Common types, envelope records, and errors shared across the vault crates.

pub mod error;
pub mod types;

pub use error::VaultError;
pub use types::{
    AccountSummary, CredentialRecord, Envelope, HashScheme, ItemId, ItemSummary, ItemType, NewAccount, OwnerId,
    Role, Session, StoredItem,
};
