//! Turning merged layers into a validated [`Config`].
//!
//! [`resolve`] checks every rule and reports all violations at once in a
//! [`ConfigurationIssue`].  It is also the one place that changes anything
//! outside the process during configuration: missing GPG keys are imported
//! into the local key ring through a [`KeyStore`].  Keys already present are
//! never imported again.

use std::{fs, io, path::Path};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::{
        Config, DestConfig, DestSection, EmailConfig, EmailSection, GpgConfig, Merged, Secret,
        SourceConfig, Unset,
    },
    keystore::KeyStore,
    planner::Operation,
};

const MISSING_FINGERPRINT: &str = "You MUST set `gpg.fingerprint` to a valid GPG public key. \
                                   Use gpg --list-keys to see what's available.";

const PASSPHRASE_HINT: &str =
    "If your private key is encrypted, ensure env var 'PASSPHRASE' is set and valid.";

pub const NO_DIRECTORIES: &str = "No source directories found";

/// Every rule the configuration violates, one message each.
#[derive(Debug, Error)]
#[error("{}", .problems.join("\n"))]
pub struct ConfigurationIssue {
    pub problems: Vec<String>,
}

/// Validate `merged`, importing GPG keys as needed.
pub fn resolve(merged: Merged, keys: &dyn KeyStore) -> Result<Config, ConfigurationIssue> {
    let Merged {
        values,
        provenance,
    } = merged;
    let mut problems = Vec::new();

    // ── keys ──────────────────────────────────────────────────────────────────
    let fingerprint = values.gpg.fingerprint.unwrap_or_default();
    if fingerprint.is_unset() {
        problems.push(MISSING_FINGERPRINT.to_string());
    } else {
        let passphrase_set = std::env::var_os("PASSPHRASE").is_some_and(|p| !p.is_empty());
        if let Err(problem) = ensure_keys(
            keys,
            &fingerprint,
            values.gpg.public_key_pem.as_ref(),
            values.gpg.private_key_pem.as_ref(),
            passphrase_set,
        ) {
            problems.push(problem);
        }
    }

    // ── paths ─────────────────────────────────────────────────────────────────
    let source_base = values.source.base_dir.unwrap_or_default();
    if source_base.is_unset() {
        problems.push("`source.base_dir` must be set".into());
    }
    let dest = resolve_dest(values.dest, &mut problems);

    let directories = if values.all_subdirectories.unwrap_or(false) && !source_base.is_unset() {
        match list_subdirectories(Path::new(&source_base)) {
            Ok(found) => {
                info!("found {} subdirectories in {source_base}", found.len());
                found
            },
            Err(e) => {
                problems.push(format!("Cannot list subdirectories of {source_base}: {e}"));
                Vec::new()
            },
        }
    } else {
        values.directories.unwrap_or_default()
    };
    if directories.is_empty() {
        problems.push(NO_DIRECTORIES.into());
    }

    // ── policy ────────────────────────────────────────────────────────────────
    let do_full_after = count(values.do_full_after, "do_full_after", &mut problems);
    let keep_n_full = count(values.keep_n_full, "keep_n_full", &mut problems);
    let email = resolve_email(values.email, &mut problems);

    let command = values.command.unwrap_or_default();
    let operation = Operation::parse(&command);
    if !command.is_unset() && operation.word() != command.trim() {
        warn!("unknown command '{command}', running an incremental backup");
    }

    if !problems.is_empty() {
        return Err(ConfigurationIssue { problems });
    }

    Ok(Config {
        command,
        args: values.args.unwrap_or_default(),
        title: values.title.unwrap_or_default(),
        directories,
        do_full_after,
        keep_n_full,
        log_level: values.log_level.unwrap_or_default(),
        engine: values.engine.unwrap_or_default(),
        gpg: GpgConfig {
            fingerprint,
            public_key_pem: values.gpg.public_key_pem,
            private_key_pem: values.gpg.private_key_pem,
            binary: values.gpg.binary.unwrap_or_default(),
        },
        source: SourceConfig {
            base_dir: source_base.into(),
        },
        dest,
        email,
        provenance,
    })
}

// ─── Keys ─────────────────────────────────────────────────────────────────────

/// Make sure the key ring holds the public key (trusted) and, when private
/// material is configured, the secret key for `fingerprint`.
fn ensure_keys(
    keys: &dyn KeyStore,
    fingerprint: &str,
    public: Option<&Secret>,
    private: Option<&Secret>,
    passphrase_set: bool,
) -> Result<(), String> {
    let has_public = keys
        .has_public_key(fingerprint)
        .map_err(|e| format!("Can't list public keys: {e}"))?;
    if !has_public {
        info!("No key found with fingerprint {fingerprint}, trying import");
        let armored = public
            .filter(|k| !k.is_unset())
            .ok_or("No public key to import set \"gpg.public_key_pem\". Abort.")?;
        keys.import_public_key(armored.expose())
            .and_then(|()| keys.trust_key(fingerprint))
            .map_err(|e| format!("Can't import and trust public key: {e}"))?;
        let imported = keys
            .has_public_key(fingerprint)
            .map_err(|e| format!("Can't list public keys: {e}"))?;
        if !imported {
            return Err(format!(
                "Wrong key was imported, check fingerprint {fingerprint}."
            ));
        }
        info!("public key import successful");
    }

    let Some(armored) = private.filter(|k| !k.is_unset()) else {
        return Ok(());
    };
    let has_secret = keys
        .has_secret_key(fingerprint)
        .map_err(|e| format!("Can't list secret keys: {e}"))?;
    if has_secret {
        return Ok(());
    }
    keys.import_secret_key(armored.expose())
        .map_err(|e| format!("Can't import private key: {e}"))?;
    let imported = keys
        .has_secret_key(fingerprint)
        .map_err(|e| format!("Can't list secret keys: {e}"))?;
    if !imported {
        let mut problem = format!("Wrong private key was imported, check fingerprint {fingerprint}.");
        if !passphrase_set {
            problem.push('\n');
            problem.push_str(PASSPHRASE_HINT);
        }
        return Err(problem);
    }
    info!("private key import successful");
    Ok(())
}

// ─── Destination ──────────────────────────────────────────────────────────────

fn resolve_dest(dest: DestSection, problems: &mut Vec<String>) -> DestConfig {
    let base_dir = dest.base_dir.unwrap_or_default();
    if base_dir.is_unset() {
        problems.push("`dest.base_dir` must be set".into());
    }

    let port = dest.port.and_then(|p| match u16::try_from(p) {
        Ok(port) if port > 0 => Some(port),
        _ => {
            problems.push(format!("`dest.port` {p} is not a valid TCP port"));
            None
        },
    });

    let uri = match dest.uri {
        Some(uri) => uri,
        None => derive_uri(
            dest.proto.as_deref(),
            dest.user.as_deref(),
            dest.host.as_deref(),
            port,
        )
        .unwrap_or_else(|problem| {
            problems.push(problem);
            String::new()
        }),
    };

    DestConfig {
        base_dir,
        proto: dest.proto,
        user: dest.user,
        host: dest.host,
        port,
        uri,
    }
}

/// `<proto>://[user@]host[:port]/`, or `file://` without a protocol or
/// with `file`.
pub fn derive_uri(
    proto: Option<&str>,
    user: Option<&str>,
    host: Option<&str>,
    port: Option<u16>,
) -> Result<String, String> {
    let Some(proto) = proto.filter(|p| !p.eq_ignore_ascii_case("file")) else {
        return Ok("file://".into());
    };
    let host = host.ok_or_else(|| format!("`dest.host` must be set when `dest.proto` is {proto}"))?;
    let user = user.map(|u| format!("{u}@")).unwrap_or_default();
    let port = port.map(|p| format!(":{p}")).unwrap_or_default();
    Ok(format!("{proto}://{user}{host}{port}/"))
}

// ─── Directories ──────────────────────────────────────────────────────────────

/// First-level directories of `base`, skipping names starting with `.` or
/// `@` (Synology keeps `@eaDir` metadata folders everywhere), sorted.
pub fn list_subdirectories(base: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('@') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

// ─── Small values ─────────────────────────────────────────────────────────────

fn count(value: Option<i64>, key: &str, problems: &mut Vec<String>) -> u32 {
    let value = value.unwrap_or(0);
    u32::try_from(value).unwrap_or_else(|_| {
        problems.push(format!("`{key}` {value} is out of range"));
        0
    })
}

fn resolve_email(email: EmailSection, problems: &mut Vec<String>) -> Option<EmailConfig> {
    let server = email.server.filter(|s| !s.is_unset())?;
    let mut require = |value: Option<String>, key: &str| {
        value.filter(|v| !v.is_unset()).unwrap_or_else(|| {
            problems.push(format!("`email.{key}` must be set when `email.server` is"));
            String::new()
        })
    };
    let sender = require(email.sender, "sender");
    let recipient = require(email.recipient, "recipient");

    let raw_port = email.port.unwrap_or(0);
    let port = u16::try_from(raw_port)
        .ok()
        .filter(|p| *p > 0)
        .unwrap_or_else(|| {
            problems.push(format!("`email.port` {raw_port} is not a valid TCP port"));
            0
        });

    Some(EmailConfig {
        server,
        port,
        sender,
        recipient,
        user: email.user.filter(|u| !u.is_unset()),
        password: email.password.filter(|p| !p.is_unset()),
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
