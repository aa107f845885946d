//! Command-line interface definition.
//!
//! All argument parsing lives here so the rest of the codebase can stay
//! agnostic to `clap`.  Every configuration key has a flag; flags form the
//! highest-precedence layer ([`Cli::overrides`]).

use std::path::PathBuf;

use clap::Parser;

use crate::config::{PartialConfig, Secret};

/// Top-level CLI arguments, shared across every subcommand.
#[derive(Parser, Debug)]
#[command(
    name    = "dupback",
    about   = "Encrypted duplicity backups of many directories, with one emailed report",
    version,
    // Show a compact two-column help layout.
    help_template = "\
{before-help}{name} {version}
{about}

{usage-heading} {usage}

{all-args}{after-help}"
)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// Without it, `dupback.toml` in the working directory,
    /// `~/.config/dupback/config.toml` and `/opt/backup.toml` are tried in
    /// that order.  A file given here must exist.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.  Omit to run the backup pipeline.
    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,

    /// Print the resolved configuration, with where each value came from,
    /// and exit without running anything.
    #[arg(long)]
    pub print_config: bool,

    /// Ignore the default config file locations and built-in defaults.
    #[arg(long)]
    pub no_default_config: bool,

    // ── run ───────────────────────────────────────────────────────────────────
    /// duplicity command: full, restore, verify, collection-status,
    /// remove-older-than, … (empty = incremental backup).
    #[arg(long, allow_hyphen_values = true)]
    pub command: Option<String>,

    /// Title of the report.
    #[arg(long)]
    pub title: Option<String>,

    /// Directories below the source base directory, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub directories: Option<Vec<String>>,

    /// Back up every first-level subdirectory of the source base directory.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub all_subdirectories: Option<bool>,

    /// Run a full backup once this many increments exist (0 = never).
    #[arg(long)]
    pub do_full_after: Option<i64>,

    /// Keep this many full backups, removing older chains (0 = never).
    #[arg(long)]
    pub keep_n_full: Option<i64>,

    /// Log filter, e.g. `info` or `dupback=debug`.  `RUST_LOG` wins.
    #[arg(long)]
    pub log_level: Option<String>,

    /// duplicity executable.
    #[arg(long)]
    pub engine: Option<String>,

    // ── gpg ───────────────────────────────────────────────────────────────────
    /// Fingerprint of the key used to encrypt and sign backups.
    #[arg(long)]
    pub gpg_fingerprint: Option<String>,

    /// ASCII-armored public key, imported when missing from the key ring.
    #[arg(long)]
    pub gpg_public_key_pem: Option<String>,

    /// ASCII-armored private key, imported when missing from the key ring.
    #[arg(long)]
    pub gpg_private_key_pem: Option<String>,

    /// gpg executable.
    #[arg(long)]
    pub gpg_binary: Option<String>,

    // ── paths ─────────────────────────────────────────────────────────────────
    /// Local directory holding the configured directories.
    #[arg(long)]
    pub source_base_dir: Option<String>,

    /// Destination directory holding one backup per configured directory.
    #[arg(long)]
    pub dest_base_dir: Option<String>,

    /// Destination protocol, e.g. `sftp`, `rsync`, `file`.
    #[arg(long)]
    pub dest_proto: Option<String>,

    #[arg(long)]
    pub dest_user: Option<String>,

    #[arg(long)]
    pub dest_host: Option<String>,

    #[arg(long)]
    pub dest_port: Option<i64>,

    /// Full destination URI; replaces proto/user/host/port.
    #[arg(long)]
    pub dest_uri: Option<String>,

    // ── email ─────────────────────────────────────────────────────────────────
    /// SMTP server; without it the report is only logged.
    #[arg(long)]
    pub email_server: Option<String>,

    #[arg(long)]
    pub email_port: Option<i64>,

    #[arg(long)]
    pub email_sender: Option<String>,

    #[arg(long)]
    pub email_recipient: Option<String>,

    #[arg(long)]
    pub email_user: Option<String>,

    #[arg(long)]
    pub email_password: Option<String>,

    /// Extra arguments passed to duplicity after the command word.
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Explicit subcommands.  Running `dupback` with no subcommand triggers the
/// backup pipeline.
#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
pub enum Subcommand {
    /// Write a commented starter config to `--config` (or `dupback.toml`).
    ///
    /// Exits with an error if the file already exists.
    Init,
}

impl Cli {
    /// The command-line configuration layer.
    pub fn overrides(&self) -> PartialConfig {
        let mut cfg = PartialConfig {
            command: self.command.clone(),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            title: self.title.clone(),
            directories: self.directories.clone(),
            all_subdirectories: self.all_subdirectories,
            do_full_after: self.do_full_after,
            keep_n_full: self.keep_n_full,
            log_level: self.log_level.clone(),
            engine: self.engine.clone(),
            ..PartialConfig::default()
        };

        cfg.gpg.fingerprint = self.gpg_fingerprint.clone();
        cfg.gpg.public_key_pem = self.gpg_public_key_pem.clone().map(Secret::new);
        cfg.gpg.private_key_pem = self.gpg_private_key_pem.clone().map(Secret::new);
        cfg.gpg.binary = self.gpg_binary.clone();

        cfg.source.base_dir = self.source_base_dir.clone();

        cfg.dest.base_dir = self.dest_base_dir.clone();
        cfg.dest.proto = self.dest_proto.clone();
        cfg.dest.user = self.dest_user.clone();
        cfg.dest.host = self.dest_host.clone();
        cfg.dest.port = self.dest_port;
        cfg.dest.uri = self.dest_uri.clone();

        cfg.email.server = self.email_server.clone();
        cfg.email.port = self.email_port;
        cfg.email.sender = self.email_sender.clone();
        cfg.email.recipient = self.email_recipient.clone();
        cfg.email.user = self.email_user.clone();
        cfg.email.password = self.email_password.clone().map(Secret::new);
        cfg
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
