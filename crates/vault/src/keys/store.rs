//! [`PrivateKeyStore`]: one PKCS#8 file per owner under a local key directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::KeyError;

/// File extension of stored private keys.
pub const KEY_FILE_EXTENSION: &str = "pk8";

/// Local, filesystem-resident store of owners' private keys.
///
/// Files are created owner-read/write only where the platform supports POSIX
/// permissions. On other platforms the key is written with default access
/// control and a warning is logged; that residual risk is the deployer's.
///
/// No locking: saves for different owners touch different files, and a given
/// owner's key is written exactly once.
#[derive(Clone, Debug)]
pub struct PrivateKeyStore {
    dir: PathBuf,
}

impl PrivateKeyStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the key file for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidOwner`] if `owner` cannot safely be used as a
    /// file name: empty, starting with `.`, or containing anything other than
    /// ASCII letters, digits, `.`, `_` and `-`.
    pub fn path_for(&self, owner: &str) -> Result<PathBuf, KeyError> {
        if !is_valid_owner(owner) {
            return Err(KeyError::InvalidOwner(owner.to_owned()));
        }
        Ok(self.dir.join(format!("{owner}.{KEY_FILE_EXTENSION}")))
    }

    /// Persist `key` for `owner` as PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::AlreadyExists`] if a key is already stored for
    /// `owner`; an existing key is never overwritten.
    pub fn save(&self, owner: &str, key: &RsaPrivateKey) -> Result<PathBuf, KeyError> {
        let path = self.path_for(owner)?;
        create_key_dir(&self.dir)?;

        let der = key
            .to_pkcs8_der()
            .map_err(|e| KeyError::Format(e.to_string()))?;

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }

        let mut file = match opts.open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(KeyError::AlreadyExists(owner.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = file
            .write_all(der.as_bytes())
            .and_then(|()| file.sync_all());
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        restrict_permissions(&path);

        info!(owner, path = %path.display(), "private key saved");
        Ok(path)
    }

    /// Load the private key stored for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NotFound`] if there is no key file for `owner`, and
    /// [`KeyError::Format`] if the file is not a PKCS#8 RSA key.
    pub fn load(&self, owner: &str) -> Result<RsaPrivateKey, KeyError> {
        let path = self.path_for(owner)?;
        let bytes = match fs::read(&path) {
            Ok(b) => Zeroizing::new(b),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyError::NotFound(owner.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        warn_if_exposed(&path);
        RsaPrivateKey::from_pkcs8_der(&bytes)
            .map_err(|e| KeyError::Format(format!("{}: {e}", path.display())))
    }

    /// Returns `true` if a key file exists for `owner`.
    pub fn exists(&self, owner: &str) -> Result<bool, KeyError> {
        Ok(self.path_for(owner)?.is_file())
    }

    /// Remove the key file for `owner`, returning whether one existed.
    ///
    /// Only used to roll back a registration that failed after the key was
    /// written; live keys are never removed.
    pub fn discard(&self, owner: &str) -> Result<bool, KeyError> {
        let path = self.path_for(owner)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(owner, path = %path.display(), "private key discarded");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty()
        && !owner.starts_with('.')
        && owner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn create_key_dir(dir: &Path) -> Result<(), KeyError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
            warn!(path = %dir.display(), error = %e, "cannot restrict key directory permissions");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), error = %e, "cannot restrict private key permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(path: &Path) {
    warn!(
        path = %path.display(),
        "owner-only permissions are not supported on this platform; private key stored with default access control"
    );
}

#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        if meta.permissions().mode() & 0o077 != 0 {
            warn!(path = %path.display(), "private key file is readable by group or others (should be 600)");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}
