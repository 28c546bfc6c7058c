//! Command-line surface of the `vault` binary.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use common::{ItemId, OwnerId, Role, Session, VaultError};
use zeroize::Zeroizing;

use crate::keys;
use crate::service::Vault;
use crate::store::{ItemStore, UserDirectory};

#[derive(Parser)]
#[command(name = "vault", version)]
#[command(about = "Personal encrypted vault for files and notes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Account credentials, required by every command.
#[derive(Args)]
pub struct Credentials {
    /// Account username
    #[arg(short, long)]
    pub user: String,

    /// Account password. Visible to other local users when passed on the
    /// command line; prefer VAULT_PASSWORD or the interactive prompt
    #[arg(long, env = "VAULT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl Credentials {
    /// Split into username and password, prompting on the terminal when no
    /// password was supplied. `confirm` asks for it twice.
    fn into_parts(self, confirm: bool) -> Result<(String, Zeroizing<String>)> {
        let password = match self.password {
            Some(p) => Zeroizing::new(p),
            None => prompt_password(&self.user, confirm)?,
        };
        Ok((self.user, password))
    }
}

fn prompt_password(user: &str, confirm: bool) -> Result<Zeroizing<String>> {
    let first = rpassword::prompt_password(format!("Password for {user}: "))
        .map(Zeroizing::new)
        .context("password prompt")?;
    if confirm {
        let second = rpassword::prompt_password("Confirm password: ")
            .map(Zeroizing::new)
            .context("password prompt")?;
        if *first != *second {
            return Err(VaultError::InvalidInput("passwords do not match".into()).into());
        }
    }
    Ok(first)
}

/// Role names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    User,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::User => Role::User,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an account and its keypair
    Register {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// List stored items, newest first
    List {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Encrypt and store a file
    AddFile {
        #[command(flatten)]
        credentials: Credentials,

        /// Item title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// File to store
        path: PathBuf,
    },

    /// Encrypt and store a text note
    AddNote {
        #[command(flatten)]
        credentials: Credentials,

        /// Item title
        #[arg(short, long)]
        title: String,

        /// Note text
        text: String,
    },

    /// Decrypt an item to stdout or a file
    Get {
        #[command(flatten)]
        credentials: Credentials,

        /// Item id, as shown by `list`
        id: ItemId,

        /// Write the plaintext here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete an item
    Delete {
        #[command(flatten)]
        credentials: Credentials,

        /// Item id, as shown by `list`
        id: ItemId,
    },

    /// Print the account's public key and its fingerprint
    PublicKey {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Create the first administrator account
    CreateAdmin {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// List all accounts (administrators only)
    Users {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Change an account's role (administrators only)
    SetRole {
        #[command(flatten)]
        credentials: Credentials,

        /// Account id, as shown by `users`
        id: OwnerId,

        /// New role
        #[arg(value_enum)]
        role: RoleArg,
    },

    /// Delete an account with its items and key (administrators only)
    DeleteUser {
        #[command(flatten)]
        credentials: Credentials,

        /// Account id, as shown by `users`
        id: OwnerId,
    },

    /// Accounts per role and the accounts holding the most items
    /// (administrators only)
    Stats {
        #[command(flatten)]
        credentials: Credentials,

        /// How many accounts to rank; 0 lists all
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

/// Execute `command` against `vault`, writing results to `out`.
pub fn run<D, S>(vault: &Vault<D, S>, command: Command, out: &mut dyn Write) -> Result<()>
where
    D: UserDirectory,
    S: ItemStore,
{
    match command {
        Command::Register { credentials } => {
            let (user, password) = credentials.into_parts(true)?;
            let owner_id = vault.register(&user, password)?;
            writeln!(out, "registered {user} (id {owner_id})")?;
        }
        Command::List { credentials } => {
            let session = login(vault, credentials)?;
            for item in vault.list_items(&session)? {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}",
                    item.id,
                    item.item_type,
                    item.size,
                    item.created_at.to_rfc3339(),
                    item.title
                )?;
            }
        }
        Command::AddFile {
            credentials,
            title,
            path,
        } => {
            let session = login(vault, credentials)?;
            let title = match title {
                Some(t) => t,
                None => default_title(&path)?,
            };
            let id = vault.add_file(&session, &title, &path)?;
            writeln!(out, "{id}")?;
        }
        Command::AddNote {
            credentials,
            title,
            text,
        } => {
            let session = login(vault, credentials)?;
            let text = Zeroizing::new(text);
            let id = vault.add_note(&session, &title, &text)?;
            writeln!(out, "{id}")?;
        }
        Command::Get {
            credentials,
            id,
            out: target,
        } => {
            let session = login(vault, credentials)?;
            let (_, plaintext) = vault.open_item(&session, id)?;
            match target {
                Some(path) => write_private(&path, &plaintext)?,
                None => out.write_all(&plaintext)?,
            }
        }
        Command::Delete { credentials, id } => {
            let session = login(vault, credentials)?;
            if !vault.delete_item(&session, id)? {
                return Err(VaultError::ItemNotFound(id).into());
            }
            writeln!(out, "deleted {id}")?;
        }
        Command::PublicKey { credentials } => {
            let session = login(vault, credentials)?;
            let encoded = vault.public_key(&session)?;
            let fingerprint = keys::fingerprint(&keys::decode_public_key(&encoded)?)?;
            writeln!(out, "fingerprint {fingerprint}")?;
            writeln!(out, "{encoded}")?;
        }
        Command::CreateAdmin { credentials } => {
            let (user, password) = credentials.into_parts(true)?;
            let owner_id = vault.create_admin(&user, password)?;
            writeln!(out, "created administrator {user} (id {owner_id})")?;
        }
        Command::Users { credentials } => {
            let session = login(vault, credentials)?;
            for account in vault.list_users(&session)? {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    account.owner_id,
                    account.role,
                    account.created_at.to_rfc3339(),
                    account.username
                )?;
            }
        }
        Command::SetRole {
            credentials,
            id,
            role,
        } => {
            let session = login(vault, credentials)?;
            let role = Role::from(role);
            if !vault.set_role(&session, id, role)? {
                bail!("no account with id {id}");
            }
            writeln!(out, "account {id} is now {role}")?;
        }
        Command::DeleteUser { credentials, id } => {
            let session = login(vault, credentials)?;
            if !vault.delete_user(&session, id)? {
                bail!("no account with id {id}");
            }
            writeln!(out, "deleted account {id}")?;
        }
        Command::Stats { credentials, top } => {
            let session = login(vault, credentials)?;
            for (role, count) in vault.role_counts(&session)? {
                writeln!(out, "role\t{role}\t{count}")?;
            }
            for (username, count) in vault.top_item_counts(&session, top)? {
                writeln!(out, "items\t{username}\t{count}")?;
            }
        }
    }
    Ok(())
}

fn login<D, S>(vault: &Vault<D, S>, credentials: Credentials) -> Result<Session>
where
    D: UserDirectory,
    S: ItemStore,
{
    let (user, password) = credentials.into_parts(false)?;
    Ok(vault.login(&user, password)?)
}

fn default_title(path: &Path) -> Result<String, VaultError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| VaultError::InvalidInput(format!("{} has no file name", path.display())))
}

/// Write decrypted bytes to `path`, owner-read/write only on unix.
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts
        .open(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::store::LocalStore;
    use crate::test_support::fast_argon2;
    use crate::keys::PrivateKeyStore;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("vault").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn creds() -> Vec<&'static str> {
        vec!["--user", "alice", "--password", "Secret1!"]
    }

    fn exec(vault: &Vault<LocalStore, LocalStore>, args: &[&str]) -> Result<String> {
        let mut out = Vec::new();
        run(vault, parse(args), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn password_flag_is_optional_and_discouraged() {
        let cmd = Cli::command();
        let list = cmd.find_subcommand("list").unwrap();
        let arg = list
            .get_arguments()
            .find(|a| a.get_id() == "password")
            .unwrap();
        assert!(!arg.is_required_set());
        assert_eq!(arg.get_env(), Some(std::ffi::OsStr::new("VAULT_PASSWORD")));
        assert!(arg.get_help().unwrap().to_string().contains("VAULT_PASSWORD"));
    }

    #[test]
    fn parses_set_role() {
        match parse(&["set-role", "-u", "root", "--password", "pw", "4", "admin"]) {
            Command::SetRole { id, role, .. } => {
                assert_eq!(id, 4);
                assert_eq!(Role::from(role), Role::Admin);
            }
            _ => panic!("wrong subcommand"),
        }
        assert!(Cli::try_parse_from([
            "vault", "set-role", "-u", "a", "--password", "p", "4", "owner"
        ])
        .is_err());
    }

    #[test]
    fn parses_add_file_with_default_title() {
        match parse(&["add-file", "-u", "bob", "--password", "pw", "notes.txt"]) {
            Command::AddFile {
                credentials,
                title,
                path,
            } => {
                assert_eq!(credentials.user, "bob");
                assert!(title.is_none());
                assert_eq!(path, PathBuf::from("notes.txt"));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn parses_get_with_out() {
        match parse(&["get", "-u", "bob", "--password", "pw", "12", "--out", "x.bin"]) {
            Command::Get { id, out, .. } => {
                assert_eq!(id, 12);
                assert_eq!(out, Some(PathBuf::from("x.bin")));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["vault", "delete", "-u", "a", "--password", "p", "x"]).is_err());
    }

    #[test]
    fn default_title_is_file_name() {
        assert_eq!(default_title(Path::new("/tmp/report.pdf")).unwrap(), "report.pdf");
        assert!(default_title(Path::new("/")).is_err());
    }

    #[test]
    fn commands_run_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::in_memory();
        let vault = Vault::new(
            store.clone(),
            store,
            PrivateKeyStore::new(tmp.path().join("keys")),
            fast_argon2(),
        );

        let mut args = vec!["register"];
        args.extend(creds());
        assert_eq!(exec(&vault, &args).unwrap(), "registered alice (id 1)\n");

        let mut args = vec!["add-note", "--title", "pin"];
        args.extend(creds());
        args.push("1234");
        assert_eq!(exec(&vault, &args).unwrap(), "1\n");

        let mut args = vec!["list"];
        args.extend(creds());
        let listing = exec(&vault, &args).unwrap();
        assert!(listing.starts_with("1\tnote\t4\t"));
        assert!(listing.trim_end().ends_with("\tpin"));

        let mut args = vec!["get"];
        args.extend(creds());
        args.push("1");
        assert_eq!(exec(&vault, &args).unwrap(), "1234");

        let target = tmp.path().join("pin.txt");
        let target_str = target.to_str().unwrap();
        let mut args = vec!["get", "--out", target_str];
        args.extend(creds());
        args.push("1");
        exec(&vault, &args).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"1234");

        let mut args = vec!["public-key"];
        args.extend(creds());
        assert!(exec(&vault, &args).unwrap().starts_with("fingerprint "));

        let mut args = vec!["delete"];
        args.extend(creds());
        args.push("1");
        assert_eq!(exec(&vault, &args).unwrap(), "deleted 1\n");

        let mut args = vec!["delete"];
        args.extend(creds());
        args.push("1");
        let err = exec(&vault, &args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::ItemNotFound(1))
        ));
    }

    #[test]
    fn wrong_password_surfaces_as_auth_failure() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::in_memory();
        let vault = Vault::new(
            store.clone(),
            store,
            PrivateKeyStore::new(tmp.path().join("keys")),
            fast_argon2(),
        );
        let err = exec(&vault, &["list", "-u", "nobody", "--password", "x"]).unwrap_err();
        let vault_err = err.downcast_ref::<VaultError>().unwrap();
        assert_eq!(vault_err.public_message(), "invalid credentials");
    }

    #[test]
    fn admin_commands_run_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::in_memory();
        let vault = Vault::new(
            store.clone(),
            store,
            PrivateKeyStore::new(tmp.path().join("keys")),
            fast_argon2(),
        );
        let root = ["-u", "root", "--password", "pw"];
        let with = |cmd: &[&'static str], extra: &[&'static str]| {
            let mut args: Vec<&str> = cmd.to_vec();
            args.extend(root);
            args.extend(extra);
            args
        };

        assert_eq!(
            exec(&vault, &with(&["create-admin"], &[])).unwrap(),
            "created administrator root (id 1)\n"
        );
        exec(&vault, &["register", "-u", "bob", "--password", "b"]).unwrap();
        exec(&vault, &["add-note", "-u", "bob", "--password", "b", "-t", "x", "y"]).unwrap();

        let users = exec(&vault, &with(&["users"], &[])).unwrap();
        let lines: Vec<&str> = users.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1\tadmin\t"));
        assert!(lines[1].starts_with("2\tuser\t") && lines[1].ends_with("\tbob"));

        let stats = exec(&vault, &with(&["stats"], &["--top", "1"])).unwrap();
        assert_eq!(stats, "role\tuser\t1\nrole\tadmin\t1\nitems\tbob\t1\n");

        assert_eq!(
            exec(&vault, &with(&["set-role"], &["2", "admin"])).unwrap(),
            "account 2 is now admin\n"
        );
        assert!(exec(&vault, &with(&["set-role"], &["7", "user"])).is_err());

        assert_eq!(
            exec(&vault, &with(&["delete-user"], &["2"])).unwrap(),
            "deleted account 2\n"
        );
        assert!(!tmp.path().join("keys").join("bob.pk8").exists());

        // Plain users are refused, with a generic message.
        exec(&vault, &["register", "-u", "carol", "--password", "c"]).unwrap();
        let err = exec(&vault, &["users", "-u", "carol", "--password", "c"]).unwrap_err();
        let vault_err = err.downcast_ref::<VaultError>().unwrap();
        assert_eq!(vault_err.public_message(), "operation not permitted");
    }
}
