//! [`LocalStore`]: accounts and items held in memory, optionally mirrored to a
//! JSON file.
//!
//! Every mutation is applied to a copy of the current snapshot, written to
//! disk (temp file in the same directory, then rename), and only then made
//! visible. A failed write leaves both the file and the in-memory state as
//! they were.
//!
//! A persisted store may be shared by several processes. Each access takes an
//! advisory lock on `<path>.lock` (shared for reads, exclusive for mutations)
//! and reloads the snapshot under it, so ids stay unique and no process
//! overwrites another's changes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    AccountSummary, CredentialRecord, Envelope, ItemId, ItemSummary, ItemType, NewAccount,
    OwnerId, Role, StoredItem, VaultError,
};
use fd_lock::RwLock as FileLock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{ItemStore, UserDirectory};

#[derive(Clone, Serialize, Deserialize)]
struct Account {
    owner_id: OwnerId,
    username: String,
    password_hash: String,
    public_key: String,
    #[serde(default)]
    role: Role,
    created_at: DateTime<Utc>,
}

impl Account {
    fn summary(&self) -> AccountSummary {
        AccountSummary {
            owner_id: self.owner_id,
            username: self.username.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    last_owner_id: OwnerId,
    #[serde(default)]
    last_item_id: ItemId,
    #[serde(default)]
    accounts: BTreeMap<OwnerId, Account>,
    #[serde(default)]
    items: BTreeMap<ItemId, StoredItem>,
}

/// Reference [`UserDirectory`] and [`ItemStore`]. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct LocalStore {
    state: Arc<RwLock<Snapshot>>,
    path: Option<PathBuf>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .field("accounts", &state.accounts.len())
            .field("items", &state.items.len())
            .finish()
    }
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(Snapshot::default())),
            path: None,
        }
    }

    /// Open the store persisted at `path`, starting empty if the file does
    /// not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let path = path.into();
        let lock = lock_file(&path)?;
        let snapshot = {
            let _held = lock.read().map_err(|e| storage(&path, e))?;
            read_snapshot(&path)?
        };
        info!(
            path = %path.display(),
            accounts = snapshot.accounts.len(),
            items = snapshot.items.len(),
            "local store opened"
        );
        Ok(Self {
            state: Arc::new(RwLock::new(snapshot)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the current snapshot, reloaded from disk for a
    /// persisted store.
    fn view<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T, VaultError> {
        let Some(path) = &self.path else {
            return Ok(f(&*self.state.read()));
        };
        // In-process lock first, file lock second, same as `mutate`.
        let mut state = self.state.write();
        let lock = lock_file(path)?;
        let _held = lock.read().map_err(|e| storage(path, e))?;
        *state = read_snapshot(path)?;
        Ok(f(&*state))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let mut state = self.state.write();
        let Some(path) = &self.path else {
            let mut next = state.clone();
            let out = f(&mut next)?;
            *state = next;
            return Ok(out);
        };

        let mut lock = lock_file(path)?;
        let _held = lock.write().map_err(|e| storage(path, e))?;
        *state = read_snapshot(path)?;
        let mut next = state.clone();
        let out = f(&mut next)?;
        write_snapshot(path, &next)?;
        *state = next;
        Ok(out)
    }
}

fn storage(path: &Path, e: io::Error) -> VaultError {
    VaultError::Storage(format!("{}: {e}", path.display()))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Open (creating if needed) the advisory lock file guarding `path`.
fn lock_file(path: &Path) -> Result<FileLock<File>, VaultError> {
    fs::create_dir_all(parent_dir(path)).map_err(|e| storage(path, e))?;
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".lock");
    let lock_path = PathBuf::from(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| storage(&lock_path, e))?;
    Ok(FileLock::new(file))
}

fn read_snapshot(path: &Path) -> Result<Snapshot, VaultError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::Storage(format!("cannot parse {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(e) => Err(VaultError::Storage(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), VaultError> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent).map_err(|e| storage(path, e))?;

    let tmp = NamedTempFile::new_in(parent).map_err(|e| storage(path, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut w, snapshot)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        w.flush().map_err(|e| storage(path, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| storage(path, e))?;
    tmp.persist(path).map_err(|e| storage(path, e.error))?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

impl UserDirectory for LocalStore {
    fn find_credential(&self, username: &str) -> Result<Option<CredentialRecord>, VaultError> {
        self.view(|s| {
            s.accounts
                .values()
                .find(|a| a.username == username)
                .map(|a| CredentialRecord {
                    owner_id: a.owner_id,
                    username: a.username.clone(),
                    stored_hash: a.password_hash.clone(),
                    role: a.role,
                })
        })
    }

    fn find_public_key(&self, owner_id: OwnerId) -> Result<Option<String>, VaultError> {
        self.view(|s| s.accounts.get(&owner_id).map(|a| a.public_key.clone()))
    }

    fn store_account(&self, account: NewAccount) -> Result<OwnerId, VaultError> {
        self.mutate(|s| {
            if s.accounts.values().any(|a| a.username == account.username) {
                return Err(VaultError::InvalidInput(format!(
                    "username {:?} is already registered",
                    account.username
                )));
            }
            s.last_owner_id += 1;
            let owner_id = s.last_owner_id;
            s.accounts.insert(
                owner_id,
                Account {
                    owner_id,
                    username: account.username,
                    password_hash: account.password_hash,
                    public_key: account.public_key,
                    role: account.role,
                    created_at: Utc::now(),
                },
            );
            Ok(owner_id)
        })
    }

    fn update_password_hash(
        &self,
        owner_id: OwnerId,
        password_hash: &str,
    ) -> Result<bool, VaultError> {
        if !self.view(|s| s.accounts.contains_key(&owner_id))? {
            return Ok(false);
        }
        self.mutate(|s| match s.accounts.get_mut(&owner_id) {
            Some(a) => {
                a.password_hash = password_hash.to_owned();
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn list_accounts(&self) -> Result<Vec<AccountSummary>, VaultError> {
        self.view(|s| s.accounts.values().map(Account::summary).collect())
    }

    fn update_role(&self, owner_id: OwnerId, role: Role) -> Result<bool, VaultError> {
        if !self.view(|s| s.accounts.contains_key(&owner_id))? {
            return Ok(false);
        }
        self.mutate(|s| match s.accounts.get_mut(&owner_id) {
            Some(a) => {
                a.role = role;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn delete_account(&self, owner_id: OwnerId) -> Result<bool, VaultError> {
        if !self.view(|s| s.accounts.contains_key(&owner_id))? {
            return Ok(false);
        }
        self.mutate(|s| Ok(s.accounts.remove(&owner_id).is_some()))
    }
}

impl ItemStore for LocalStore {
    fn put(
        &self,
        owner_id: OwnerId,
        item_type: ItemType,
        envelope: &Envelope,
        title: &str,
        size: u64,
    ) -> Result<ItemId, VaultError> {
        self.mutate(|s| {
            s.last_item_id += 1;
            let id = s.last_item_id;
            s.items.insert(
                id,
                StoredItem {
                    summary: ItemSummary {
                        id,
                        owner_id,
                        title: title.to_owned(),
                        item_type,
                        size,
                        created_at: Utc::now(),
                    },
                    envelope: envelope.clone(),
                },
            );
            Ok(id)
        })
    }

    fn get(&self, item_id: ItemId, owner_id: OwnerId) -> Result<Option<StoredItem>, VaultError> {
        self.view(|s| {
            s.items
                .get(&item_id)
                .filter(|i| i.summary.owner_id == owner_id)
                .cloned()
        })
    }

    fn list(&self, owner_id: OwnerId) -> Result<Vec<ItemSummary>, VaultError> {
        let mut out: Vec<ItemSummary> = self.view(|s| {
            s.items
                .values()
                .filter(|i| i.summary.owner_id == owner_id)
                .map(|i| i.summary.clone())
                .collect()
        })?;
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn delete(&self, item_id: ItemId, owner_id: OwnerId) -> Result<bool, VaultError> {
        let owned = self.view(|s| {
            s.items
                .get(&item_id)
                .is_some_and(|i| i.summary.owner_id == owner_id)
        })?;
        if !owned {
            return Ok(false);
        }
        self.mutate(|s| {
            let owned = s
                .items
                .get(&item_id)
                .is_some_and(|i| i.summary.owner_id == owner_id);
            Ok(owned && s.items.remove(&item_id).is_some())
        })
    }

    fn delete_all(&self, owner_id: OwnerId) -> Result<usize, VaultError> {
        let count = self.view(|s| {
            s.items
                .values()
                .filter(|i| i.summary.owner_id == owner_id)
                .count()
        })?;
        if count == 0 {
            return Ok(0);
        }
        self.mutate(|s| {
            let before = s.items.len();
            s.items.retain(|_, i| i.summary.owner_id != owner_id);
            Ok(before - s.items.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account(username: &str) -> NewAccount {
        NewAccount {
            username: username.into(),
            password_hash: "$argon2id$stub".into(),
            public_key: "cHVibGlj".into(),
            role: Role::User,
        }
    }

    fn envelope(tag: u8) -> Envelope {
        Envelope {
            iv: vec![tag; 12],
            ciphertext: vec![tag; 20],
            wrapped_key: vec![tag; 256],
            wrap_algorithm: "RSA-OAEP".into(),
        }
    }

    #[test]
    fn owner_ids_start_at_one_and_increase() {
        let store = LocalStore::in_memory();
        assert_eq!(store.store_account(account("alice")).unwrap(), 1);
        assert_eq!(store.store_account(account("bob")).unwrap(), 2);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = LocalStore::in_memory();
        store.store_account(account("alice")).unwrap();
        assert!(matches!(
            store.store_account(account("alice")),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn credential_and_public_key_lookup() {
        let store = LocalStore::in_memory();
        let id = store.store_account(account("alice")).unwrap();

        let rec = store.find_credential("alice").unwrap().unwrap();
        assert_eq!(rec.owner_id, id);
        assert_eq!(rec.stored_hash, "$argon2id$stub");
        assert_eq!(rec.role, Role::User);
        assert!(store.find_credential("nobody").unwrap().is_none());

        assert_eq!(store.find_public_key(id).unwrap().as_deref(), Some("cHVibGlj"));
        assert!(store.find_public_key(99).unwrap().is_none());
    }

    #[test]
    fn update_password_hash_replaces_only_known_owner() {
        let store = LocalStore::in_memory();
        let id = store.store_account(account("alice")).unwrap();
        assert!(store.update_password_hash(id, "$argon2id$new").unwrap());
        assert_eq!(
            store.find_credential("alice").unwrap().unwrap().stored_hash,
            "$argon2id$new"
        );
        assert!(!store.update_password_hash(42, "$argon2id$x").unwrap());
    }

    #[test]
    fn items_are_scoped_by_owner() {
        let store = LocalStore::in_memory();
        let id = store.put(1, ItemType::Note, &envelope(1), "mine", 7).unwrap();

        let item = store.get(id, 1).unwrap().unwrap();
        assert_eq!(item.summary.title, "mine");
        assert_eq!(item.summary.size, 7);
        assert_eq!(item.envelope, envelope(1));

        assert!(store.get(id, 2).unwrap().is_none());
        assert!(!store.delete(id, 2).unwrap());
        assert!(store.get(id, 1).unwrap().is_some());
    }

    #[test]
    fn list_is_newest_first_and_owner_only() {
        let store = LocalStore::in_memory();
        let first = store.put(1, ItemType::File, &envelope(1), "a", 1).unwrap();
        store.put(2, ItemType::File, &envelope(2), "other", 1).unwrap();
        let second = store.put(1, ItemType::Note, &envelope(3), "b", 1).unwrap();

        let ids: Vec<ItemId> = store.list(1).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(store.list(3).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_item() {
        let store = LocalStore::in_memory();
        let id = store.put(1, ItemType::File, &envelope(1), "a", 1).unwrap();
        assert!(store.delete(id, 1).unwrap());
        assert!(store.get(id, 1).unwrap().is_none());
        assert!(!store.delete(id, 1).unwrap());
    }

    #[test]
    fn item_ids_are_not_reused_after_delete() {
        let store = LocalStore::in_memory();
        let a = store.put(1, ItemType::File, &envelope(1), "a", 1).unwrap();
        store.delete(a, 1).unwrap();
        let b = store.put(1, ItemType::File, &envelope(1), "b", 1).unwrap();
        assert!(b > a);
    }

    #[test]
    fn persisted_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vault.json");

        let store = LocalStore::open(&path).unwrap();
        let owner = store.store_account(account("alice")).unwrap();
        let item = store.put(owner, ItemType::Note, &envelope(9), "n", 3).unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.find_credential("alice").unwrap().unwrap().owner_id, owner);
        assert_eq!(reopened.get(item, owner).unwrap().unwrap().envelope, envelope(9));
        // Counters survive too.
        assert_eq!(reopened.store_account(account("bob")).unwrap(), owner + 1);
    }

    #[test]
    fn corrupt_snapshot_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(LocalStore::open(&path), Err(VaultError::Storage(_))));
    }

    #[test]
    fn accounts_listed_by_id_without_secrets() {
        let store = LocalStore::in_memory();
        store.store_account(account("bob")).unwrap();
        store.store_account(account("alice")).unwrap();

        let listed = store.list_accounts().unwrap();
        let names: Vec<&str> = listed.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, ["bob", "alice"]);
        assert_eq!(listed[0].owner_id, 1);
        assert_eq!(listed[1].role, Role::User);
    }

    #[test]
    fn update_role_and_delete_account() {
        let store = LocalStore::in_memory();
        let id = store.store_account(account("alice")).unwrap();

        assert!(store.update_role(id, Role::Admin).unwrap());
        assert_eq!(store.find_credential("alice").unwrap().unwrap().role, Role::Admin);
        assert!(!store.update_role(99, Role::Admin).unwrap());

        assert!(store.delete_account(id).unwrap());
        assert!(store.find_credential("alice").unwrap().is_none());
        assert!(!store.delete_account(id).unwrap());
        // Ids are not reused after an account is removed.
        assert_eq!(store.store_account(account("alice")).unwrap(), id + 1);
    }

    #[test]
    fn delete_all_removes_only_that_owner() {
        let store = LocalStore::in_memory();
        store.put(1, ItemType::File, &envelope(1), "a", 1).unwrap();
        store.put(1, ItemType::Note, &envelope(2), "b", 1).unwrap();
        let kept = store.put(2, ItemType::Note, &envelope(3), "c", 1).unwrap();

        assert_eq!(store.delete_all(1).unwrap(), 2);
        assert!(store.list(1).unwrap().is_empty());
        assert!(store.get(kept, 2).unwrap().is_some());
        assert_eq!(store.delete_all(1).unwrap(), 0);
    }

    #[test]
    fn two_handles_on_one_file_see_each_others_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.json");
        let first = LocalStore::open(&path).unwrap();
        let second = LocalStore::open(&path).unwrap();

        assert_eq!(first.store_account(account("alice")).unwrap(), 1);
        assert_eq!(second.store_account(account("bob")).unwrap(), 2);
        assert!(second.find_credential("alice").unwrap().is_some());
        assert!(first.find_credential("bob").unwrap().is_some());
        assert!(matches!(
            second.store_account(account("alice")),
            Err(VaultError::InvalidInput(_))
        ));

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.list_accounts().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_writers_on_one_file_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.json");

        std::thread::scope(|s| {
            for owner in 1..=4u64 {
                let path = &path;
                s.spawn(move || {
                    let store = LocalStore::open(path).unwrap();
                    for n in 0..10u8 {
                        store
                            .put(owner, ItemType::Note, &envelope(n), "n", 1)
                            .unwrap();
                    }
                });
            }
        });

        let reopened = LocalStore::open(&path).unwrap();
        let mut ids = Vec::new();
        for owner in 1..=4u64 {
            let listed = reopened.list(owner).unwrap();
            assert_eq!(listed.len(), 10);
            ids.extend(listed.iter().map(|i| i.id));
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=40).collect::<Vec<ItemId>>());
    }

    #[test]
    fn clones_share_state() {
        let store = LocalStore::in_memory();
        let clone = store.clone();
        store.store_account(account("alice")).unwrap();
        assert!(clone.find_credential("alice").unwrap().is_some());
    }
}
