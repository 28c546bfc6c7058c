//! Shared fixtures for unit tests. RSA-2048 generation is slow, so two
//! keypairs are generated once per test binary and reused.

use std::sync::OnceLock;

use crate::credential::Argon2Settings;
use crate::keys::{generate_keypair, Keypair};

static KEYPAIR: OnceLock<Keypair> = OnceLock::new();
static OTHER_KEYPAIR: OnceLock<Keypair> = OnceLock::new();

pub fn keypair() -> &'static Keypair {
    KEYPAIR.get_or_init(|| generate_keypair().expect("keypair generation"))
}

pub fn other_keypair() -> &'static Keypair {
    OTHER_KEYPAIR.get_or_init(|| generate_keypair().expect("keypair generation"))
}

/// Argon2id parameters cheap enough for tests. Never use outside tests.
pub fn fast_argon2() -> Argon2Settings {
    Argon2Settings {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    }
}
