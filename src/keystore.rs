//! Local GPG key store access.
//!
//! The resolver only needs five questions answered, so the key ring is hidden
//! behind [`KeyStore`].  [`GpgKeyStore`] shells out to `gpg`; tests use the
//! `mockall`-generated `MockKeyStore`.
//!
//! Presence checks use the machine-readable colon listing:
//!
//! ```text
//! gpg --list-keys --with-colons --with-fingerprint <fingerprint>
//! ```

use std::io::Write;

use anyhow::Context;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{config::Secret, ui::run_captured};

/// Ownertrust level written by [`KeyStore::trust_key`] ("ultimate").
pub const ULTIMATE_TRUST: u8 = 6;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error(transparent)]
    Spawn(#[from] anyhow::Error),

    #[error("{command} exited with code {code:?}\n  stdout: {stdout}\n  stderr: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// The operations the resolver performs on the local key ring.
#[cfg_attr(test, mockall::automock)]
pub trait KeyStore {
    fn has_public_key(&self, fingerprint: &str) -> Result<bool, KeyStoreError>;
    fn has_secret_key(&self, fingerprint: &str) -> Result<bool, KeyStoreError>;
    fn import_public_key(&self, armored: &str) -> Result<(), KeyStoreError>;
    fn trust_key(&self, fingerprint: &str) -> Result<(), KeyStoreError>;
    fn import_secret_key(&self, armored: &str) -> Result<(), KeyStoreError>;
}

/// [`KeyStore`] backed by the `gpg` executable.
#[derive(Debug, Clone)]
pub struct GpgKeyStore {
    binary: String,
    passphrase: Option<Secret>,
}

impl GpgKeyStore {
    /// Uses `$PASSPHRASE` (the variable duplicity also reads) to unlock
    /// protected secret keys during import.
    pub fn new(binary: impl Into<String>) -> Self {
        let passphrase = std::env::var("PASSPHRASE")
            .ok()
            .filter(|p| !p.is_empty())
            .map(Secret::new);
        Self {
            binary: binary.into(),
            passphrase,
        }
    }

    fn command(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.binary.clone())
            .chain(args.iter().map(|a| (*a).to_string()))
            .collect()
    }

    /// Run gpg, turning a non-zero exit into [`KeyStoreError::Command`].
    fn run(&self, args: Vec<String>, input: Option<&str>) -> Result<String, KeyStoreError> {
        let out = run_captured(&args, input)?;
        if out.success {
            return Ok(out.stdout);
        }
        Err(KeyStoreError::Command {
            command: args.join(" "),
            code: out.code,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    /// `--list-keys` / `--list-secret-keys` for one fingerprint.  gpg exits
    /// non-zero with `missing` on stderr when the key is simply absent.
    fn lists(&self, list_flag: &str, fingerprint: &str, missing: &str) -> Result<bool, KeyStoreError> {
        let args = self.command(&[list_flag, "--with-colons", "--with-fingerprint", fingerprint]);
        match self.run(args, None) {
            Ok(stdout) => Ok(listing_contains(&stdout, fingerprint)),
            Err(KeyStoreError::Command { stderr, .. }) if stderr.contains(missing) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl KeyStore for GpgKeyStore {
    fn has_public_key(&self, fingerprint: &str) -> Result<bool, KeyStoreError> {
        self.lists("--list-keys", fingerprint, "No public key")
    }

    fn has_secret_key(&self, fingerprint: &str) -> Result<bool, KeyStoreError> {
        self.lists("--list-secret-keys", fingerprint, "No secret key")
    }

    fn import_public_key(&self, armored: &str) -> Result<(), KeyStoreError> {
        self.run(self.command(&["--batch", "--import"]), Some(armored))
            .map(drop)
    }

    fn trust_key(&self, fingerprint: &str) -> Result<(), KeyStoreError> {
        let line = ownertrust_line(fingerprint);
        self.run(self.command(&["--import-ownertrust"]), Some(&line))
            .map(drop)
    }

    fn import_secret_key(&self, armored: &str) -> Result<(), KeyStoreError> {
        let mut args = self.command(&["--batch", "--with-colons", "--import"]);
        // Kept alive until gpg exits; the file is removed on drop.
        let pass_file = self.passphrase.as_ref().map(passphrase_file).transpose()?;
        if let Some(file) = &pass_file {
            args.extend([
                "--pinentry-mode".into(),
                "loopback".into(),
                "--passphrase-file".into(),
                file.path().to_string_lossy().into_owned(),
            ]);
        }
        self.run(args, Some(armored)).map(drop)
    }
}

/// The passphrase in a private (`0600`) temp file, so it never shows up in
/// the process list.
fn passphrase_file(passphrase: &Secret) -> Result<NamedTempFile, KeyStoreError> {
    let mut file = NamedTempFile::new().context("creating passphrase file")?;
    file.write_all(passphrase.expose().as_bytes())
        .and_then(|()| file.flush())
        .context("writing passphrase file")?;
    Ok(file)
}

/// `<fingerprint>:6:` line understood by `gpg --import-ownertrust`.
pub fn ownertrust_line(fingerprint: &str) -> String {
    format!("{fingerprint}:{ULTIMATE_TRUST}:\n")
}

/// Whether a `--with-colons` listing mentions `fingerprint`.  gpg prints
/// fingerprints upper-case; configs are often lower-case.
pub fn listing_contains(listing: &str, fingerprint: &str) -> bool {
    !fingerprint.is_empty() && listing.to_ascii_uppercase().contains(&fingerprint.to_ascii_uppercase())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
