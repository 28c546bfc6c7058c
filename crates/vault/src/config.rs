//! Configuration loading and validation.
//!
//! All values are read from `VAULT_`-prefixed environment variables at
//! startup and every one has a default. The process exits with a clear error
//! message if a value is present but invalid.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::credential::Argon2Settings;

/// Validated vault configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one PKCS#8 private key file per user.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// JSON file backing the local user directory and item store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Argon2id memory cost, in KiB, for new password hashes.
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2id pass count for new password hashes.
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2id lane count for new password hashes.
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_dir() -> PathBuf {
    "keys".into()
}
fn default_store_path() -> PathBuf {
    "vault.json".into()
}
fn default_argon2_memory_kib() -> u32 {
    65_536
}
fn default_argon2_iterations() -> u32 {
    3
}
fn default_argon2_parallelism() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix("VAULT"))
    }

    fn load(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.key_dir.to_string_lossy(), "VAULT_KEY_DIR")?;
        ensure_non_empty(&self.store_path.to_string_lossy(), "VAULT_STORE_PATH")?;

        if self.argon2_iterations == 0 {
            anyhow::bail!("VAULT_ARGON2_ITERATIONS must be >= 1");
        }
        if self.argon2_parallelism == 0 {
            anyhow::bail!("VAULT_ARGON2_PARALLELISM must be >= 1");
        }
        if u64::from(self.argon2_memory_kib) < 8 * u64::from(self.argon2_parallelism) {
            anyhow::bail!(
                "VAULT_ARGON2_MEMORY_KIB must be at least 8 x VAULT_ARGON2_PARALLELISM ({})",
                8 * u64::from(self.argon2_parallelism)
            );
        }
        Ok(())
    }

    /// Argon2id cost parameters for new password hashes.
    pub fn argon2_settings(&self) -> Argon2Settings {
        Argon2Settings {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty");
    }
    Ok(())
}
