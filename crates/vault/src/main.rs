//! `vault` binary entry point.
//!
//! After the command line is parsed:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Open the local store and private key directory.
//! 4. Run the command.
//!
//! Failures print only [`VaultError::public_message`]; detail goes to the log.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use common::VaultError;
use tracing::{error, info};

use vault::cli::{self, Cli};
use vault::config::Config;
use vault::keys::PrivateKeyStore;
use vault::store::LocalStore;
use vault::{telemetry, Vault};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<VaultError>() {
                Some(vault_err) => {
                    error!(code = vault_err.code(), error = %vault_err, "command failed");
                    eprintln!("error: {}", vault_err.public_message());
                }
                None => {
                    error!(error = %e, "command failed");
                    eprintln!("error: {e:#}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env()?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        key_dir = %cfg.key_dir.display(),
        store = %cfg.store_path.display(),
        "vault starting"
    );

    // -----------------------------------------------------------------------
    // 3. Stores
    // -----------------------------------------------------------------------
    let store = LocalStore::open(&cfg.store_path)?;
    let vault = Vault::new(
        store.clone(),
        store,
        PrivateKeyStore::new(&cfg.key_dir),
        cfg.argon2_settings(),
    );

    // -----------------------------------------------------------------------
    // 4. Command
    // -----------------------------------------------------------------------
    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli::run(&vault, cli.command, &mut out)?;
    out.flush()?;
    Ok(())
}
