//! Job planning: paths and duplicity argument vectors.
//!
//! Nothing here executes anything.  Every function is pure, so the exact
//! argument shapes are unit- and snapshot-tested without duplicity installed.
//!
//! # Argument shapes
//!
//! | Operation                                   | Arguments                              |
//! |---------------------------------------------|----------------------------------------|
//! | incremental (`backup`, `inc`, empty)        | `backup [extra…] <source> <dest>`      |
//! | `full`                                      | `full [extra…] <source> <dest>`        |
//! | `restore`, `verify`                         | `<op> [extra…] <dest> <source>`        |
//! | `collection-status`, `remove*`, `cleanup`, `list-current-files` | `<op> [extra…] <dest>` |
//!
//! `--encrypt-key <fingerprint>` is added by the engine itself
//! ([`crate::engine::Duplicity`]).

use std::{fmt, path::PathBuf};

use crate::config::Config;

/// Commands that only look at the destination's backup catalog.
const CATALOG_COMMANDS: [&str; 4] = ["collection-status", "remove", "cleanup", "list-current-files"];

// ─── Operation ────────────────────────────────────────────────────────────────

/// What one job asks duplicity to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `backup` / `inc`, or anything unrecognised.  Holds the command word.
    Incremental(String),
    Full,
    /// Reads from the destination and writes into the local path.
    Restore,
    /// Any command containing `verify`.
    Verify(String),
    /// Destination-only commands; see [`CATALOG_COMMANDS`].
    Catalog(String),
}

impl Operation {
    /// Classify a configured command.
    pub fn parse(command: &str) -> Self {
        let command = command.trim();
        if command == "full" {
            Self::Full
        } else if command == "restore" {
            Self::Restore
        } else if command.contains("verify") {
            Self::Verify(command.into())
        } else if CATALOG_COMMANDS.iter().any(|c| command.contains(c)) {
            Self::Catalog(command.into())
        } else if command == "inc" {
            Self::Incremental("inc".into())
        } else {
            Self::Incremental("backup".into())
        }
    }

    /// The command word passed to duplicity.
    pub fn word(&self) -> &str {
        match self {
            Self::Incremental(word) | Self::Verify(word) | Self::Catalog(word) => word,
            Self::Full => "full",
            Self::Restore => "restore",
        }
    }

    /// Operations subject to full-backup escalation.
    pub const fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental(_))
    }

    /// Operations that write a new backup set and so may be followed by
    /// retention cleanup.
    pub const fn writes_backup(&self) -> bool {
        matches!(self, Self::Incremental(_) | Self::Full)
    }

    /// Operations that read the local source tree, which must then exist.
    pub const fn reads_source(&self) -> bool {
        matches!(self, Self::Incremental(_) | Self::Full | Self::Verify(_))
    }

    /// Whether the local path is passed at all.
    pub const fn uses_source(&self) -> bool {
        !matches!(self, Self::Catalog(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}

// ─── Paths ────────────────────────────────────────────────────────────────────

/// Where one configured directory lives locally and remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Directory name as configured.
    pub name: String,
    /// `<source.base_dir>/<name>`.
    pub source: PathBuf,
    /// `<dest.base_dir>/<name>`, the path on the destination host.
    pub remote_path: String,
    /// `<dest.uri><remote_path>`, what duplicity is given.
    pub destination: String,
}

impl JobPaths {
    pub fn new(cfg: &Config, name: &str) -> Self {
        let source = cfg.source.base_dir.join(name);
        let remote_path = join_remote(&cfg.dest.base_dir, name);
        let destination = format!("{}{remote_path}", cfg.dest.uri);
        Self {
            name: name.into(),
            source,
            remote_path,
            destination,
        }
    }
}

/// `/`-join for destination paths, which are never local `Path`s.
pub fn join_remote(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

// ─── BackupJob ────────────────────────────────────────────────────────────────

/// A fully planned duplicity invocation for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub operation: Operation,
    pub source: String,
    pub destination: String,
    pub args: Vec<String>,
}

impl BackupJob {
    /// Plan `operation` on `paths`.  `extra` goes right after the command word.
    pub fn new(operation: Operation, paths: &JobPaths, extra: &[String]) -> Self {
        let local = paths.source.to_string_lossy().into_owned();
        let remote = paths.destination.clone();

        // restore/verify read from the destination into the local tree.
        let (source, destination) = match operation {
            Operation::Restore | Operation::Verify(_) => (remote, local),
            _ => (local, remote),
        };

        let mut args = vec![operation.word().to_string()];
        args.extend(extra.iter().cloned());
        if operation.uses_source() {
            args.push(source.clone());
        }
        args.push(destination.clone());

        Self {
            operation,
            source,
            destination,
            args,
        }
    }
}

// ─── Auxiliary calls ──────────────────────────────────────────────────────────

/// `collection-status` query used to read the current increment count.
pub fn status_query_args(destination: &str) -> Vec<String> {
    vec![
        "collection-status".into(),
        destination.into(),
        "--show-changes-in-set".into(),
        "0".into(),
        "--jsonstat".into(),
    ]
}

/// Retention cleanup keeping the newest `keep` full backups.
pub fn retention_args(keep: u32, destination: &str) -> Vec<String> {
    vec![
        "remove-all-but-n-full".into(),
        keep.to_string(),
        "--force".into(),
        destination.into(),
    ]
}

// ─── Tests ────────────────────────────────────────────────────────────────────
