//! [`Vault`]: registration, login and item operations over the collaborator
//! stores.
//!
//! Every item operation takes the caller's [`Session`] explicitly. The
//! session's `owner_id` scopes store lookups and is the owner asserted when an
//! envelope is opened.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::{
    AccountSummary, ItemId, ItemSummary, ItemType, NewAccount, OwnerId, Role, Session, VaultError,
};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::credential::{self, Argon2Settings};
use crate::envelope;
use crate::keys::{self, PrivateKeyStore};
use crate::store::{ItemStore, UserDirectory};

pub struct Vault<D, S> {
    directory: D,
    items: S,
    keys: PrivateKeyStore,
    hashing: Argon2Settings,
}

impl<D, S> Vault<D, S>
where
    D: UserDirectory,
    S: ItemStore,
{
    pub fn new(directory: D, items: S, keys: PrivateKeyStore, hashing: Argon2Settings) -> Self {
        Self {
            directory,
            items,
            keys,
            hashing,
        }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn key_store(&self) -> &PrivateKeyStore {
        &self.keys
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Create an account: keypair, Argon2id hash, private key file, directory
    /// record.
    ///
    /// If the directory refuses the account after the key file was written,
    /// the key file is removed again.
    pub fn register(
        &self,
        username: &str,
        password: Zeroizing<String>,
    ) -> Result<OwnerId, VaultError> {
        self.create_account(username, password, Role::User)
    }

    fn create_account(
        &self,
        username: &str,
        password: Zeroizing<String>,
        role: Role,
    ) -> Result<OwnerId, VaultError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(VaultError::EmptyCredentials);
        }
        // Reject names that cannot be key file names before doing any work.
        self.keys.path_for(username)?;
        if self.directory.find_credential(username)?.is_some() {
            return Err(VaultError::InvalidInput(format!(
                "username {username:?} is already registered"
            )));
        }

        let keypair = keys::generate_keypair()?;
        let public_key = keys::encode_public_key(&keypair.public_key)?;
        let fingerprint = keys::fingerprint(&keypair.public_key)?;
        let password_hash = credential::hash_password(password.as_bytes(), &self.hashing)?;
        drop(password);

        self.keys.save(username, &keypair.private_key)?;
        drop(keypair);

        let account = NewAccount {
            username: username.to_owned(),
            password_hash,
            public_key,
            role,
        };
        match self.directory.store_account(account) {
            Ok(owner_id) => {
                info!(owner_id, username, %role, key = %fingerprint, "account registered");
                Ok(owner_id)
            }
            Err(e) => {
                if let Err(discard) = self.keys.discard(username) {
                    warn!(username, error = %discard, "cannot remove key of failed registration");
                }
                Err(e)
            }
        }
    }

    /// Verify credentials and open a session.
    ///
    /// A legacy bcrypt hash is replaced by an Argon2id hash of the verified
    /// password. Failing to persist the replacement does not fail the login;
    /// the next login retries.
    pub fn login(&self, username: &str, password: Zeroizing<String>) -> Result<Session, VaultError> {
        let outcome = credential::verify_login(&self.directory, username, password.as_bytes())?;
        let record = outcome.record;

        if outcome.needs_migration {
            let migrated = credential::hash_password(password.as_bytes(), &self.hashing)
                .and_then(|hash| self.directory.update_password_hash(record.owner_id, &hash));
            let owner_id = record.owner_id;
            match migrated {
                Ok(true) => info!(owner_id, "password hash migrated to argon2id"),
                Ok(false) => warn!(owner_id, "password hash migration found no account"),
                Err(e) => warn!(owner_id, error = %e, "password hash migration failed"),
            }
        }
        drop(password);

        info!(owner_id = record.owner_id, "login accepted");
        Ok(Session {
            owner_id: record.owner_id,
            username: record.username,
            role: record.role,
        })
    }

    /// The session owner's public key, Base64 SubjectPublicKeyInfo.
    pub fn public_key(&self, session: &Session) -> Result<String, VaultError> {
        self.directory
            .find_public_key(session.owner_id)?
            .ok_or_else(|| VaultError::KeyNotFound(session.username.clone()))
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Seal the contents of the file at `path` as a new item.
    pub fn add_file(
        &self,
        session: &Session,
        title: &str,
        path: &Path,
    ) -> Result<ItemId, VaultError> {
        let contents = fs::read(path).map(Zeroizing::new).map_err(|e| {
            VaultError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        self.add_item(session, ItemType::File, title, &contents)
    }

    /// Seal `text` as a new note.
    pub fn add_note(&self, session: &Session, title: &str, text: &str) -> Result<ItemId, VaultError> {
        self.add_item(session, ItemType::Note, title, text.as_bytes())
    }

    fn add_item(
        &self,
        session: &Session,
        item_type: ItemType,
        title: &str,
        plaintext: &[u8],
    ) -> Result<ItemId, VaultError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(VaultError::InvalidInput("title is required".into()));
        }

        let encoded = self.public_key(session)?;
        let public_key = keys::decode_public_key(&encoded)?;
        let sealed = envelope::seal(plaintext, &public_key, session.owner_id, item_type)?;

        let size = plaintext.len() as u64;
        let item_id = self
            .items
            .put(session.owner_id, item_type, &sealed, title, size)?;
        info!(owner_id = session.owner_id, item_id, %item_type, size, "item stored");
        Ok(item_id)
    }

    /// Metadata of the session owner's items, newest first.
    pub fn list_items(&self, session: &Session) -> Result<Vec<ItemSummary>, VaultError> {
        self.items.list(session.owner_id)
    }

    /// Decrypt one of the session owner's items.
    pub fn open_item(
        &self,
        session: &Session,
        item_id: ItemId,
    ) -> Result<(ItemSummary, Zeroizing<Vec<u8>>), VaultError> {
        let item = self
            .items
            .get(item_id, session.owner_id)?
            .ok_or(VaultError::ItemNotFound(item_id))?;

        let private_key = self.keys.load(&session.username).map_err(|e| {
            warn!(owner_id = session.owner_id, error = %e, "cannot load private key");
            VaultError::from(e)
        })?;

        let plaintext = envelope::open(
            &item.envelope,
            &private_key,
            session.owner_id,
            item.summary.item_type,
        )
        .map_err(|e| {
            warn!(owner_id = session.owner_id, item_id, "item failed to open");
            e
        })?;
        Ok((item.summary, plaintext))
    }

    /// Returns `false` if no such item belongs to the session owner.
    pub fn delete_item(&self, session: &Session, item_id: ItemId) -> Result<bool, VaultError> {
        let deleted = self.items.delete(item_id, session.owner_id)?;
        if deleted {
            info!(owner_id = session.owner_id, item_id, "item deleted");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Create the first administrator account.
    ///
    /// Refused once any administrator exists; later administrators are
    /// promoted with [`Vault::set_role`].
    pub fn create_admin(
        &self,
        username: &str,
        password: Zeroizing<String>,
    ) -> Result<OwnerId, VaultError> {
        let accounts = self.directory.list_accounts()?;
        if accounts.iter().any(|a| a.role == Role::Admin) {
            warn!(username, "administrator bootstrap refused: one already exists");
            return Err(VaultError::Forbidden("create administrator"));
        }
        self.create_account(username, password, Role::Admin)
    }

    /// Every account in the directory, ordered by id.
    pub fn list_users(&self, session: &Session) -> Result<Vec<AccountSummary>, VaultError> {
        require_admin(session, "list users")?;
        self.directory.list_accounts()
    }

    /// Change an account's role. Takes effect at that account's next login.
    ///
    /// Returns `false` if the account does not exist. An administrator cannot
    /// change their own role.
    pub fn set_role(
        &self,
        session: &Session,
        owner_id: OwnerId,
        role: Role,
    ) -> Result<bool, VaultError> {
        require_admin(session, "set role")?;
        if owner_id == session.owner_id {
            return Err(VaultError::InvalidInput(
                "cannot change the role of the signed-in account".into(),
            ));
        }
        let updated = self.directory.update_role(owner_id, role)?;
        if updated {
            info!(admin = session.owner_id, owner_id, %role, "role changed");
        }
        Ok(updated)
    }

    /// Remove an account together with its items and private key file.
    ///
    /// Returns `false` if the account does not exist. An administrator cannot
    /// delete their own account.
    pub fn delete_user(&self, session: &Session, owner_id: OwnerId) -> Result<bool, VaultError> {
        require_admin(session, "delete user")?;
        if owner_id == session.owner_id {
            return Err(VaultError::InvalidInput(
                "cannot delete the signed-in account".into(),
            ));
        }
        let Some(account) = self
            .directory
            .list_accounts()?
            .into_iter()
            .find(|a| a.owner_id == owner_id)
        else {
            return Ok(false);
        };

        let items = self.items.delete_all(owner_id)?;
        if !self.directory.delete_account(owner_id)? {
            return Ok(false);
        }
        if let Err(e) = self.keys.discard(&account.username) {
            warn!(owner_id, error = %e, "cannot remove key of deleted account");
        }
        info!(admin = session.owner_id, owner_id, items, "account deleted");
        Ok(true)
    }

    /// Number of accounts per role. Roles with no accounts are absent.
    pub fn role_counts(&self, session: &Session) -> Result<BTreeMap<Role, usize>, VaultError> {
        require_admin(session, "role counts")?;
        let mut counts = BTreeMap::new();
        for account in self.directory.list_accounts()? {
            *counts.entry(account.role).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// `(username, item count)` pairs, most items first, ties by username.
    /// A `limit` of zero returns every account.
    pub fn top_item_counts(
        &self,
        session: &Session,
        limit: usize,
    ) -> Result<Vec<(String, usize)>, VaultError> {
        require_admin(session, "item counts")?;
        let mut counts = Vec::new();
        for account in self.directory.list_accounts()? {
            let count = self.items.list(account.owner_id)?.len();
            counts.push((account.username, count));
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if limit > 0 {
            counts.truncate(limit);
        }
        Ok(counts)
    }
}

fn require_admin(session: &Session, operation: &'static str) -> Result<(), VaultError> {
    if session.is_admin() {
        return Ok(());
    }
    warn!(owner_id = session.owner_id, operation, "administrative operation refused");
    Err(VaultError::Forbidden(operation))
}
