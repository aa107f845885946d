//! Configuration types and layered loading.
//!
//! A run is configured from four layers, highest precedence first:
//!
//! 1. command-line overrides ([`crate::cli::Cli::overrides`])
//! 2. the config file (`--config`, or the first of [`default_config_paths`] that exists)
//! 3. `DUPBACK_*` environment variables
//! 4. built-in defaults ([`PartialConfig::defaults`])
//!
//! Every layer is a [`PartialConfig`] where each field is optional.  An empty
//! string, a negative number and an empty list all count as "not set" in every
//! layer, so a blank `DUPBACK_TITLE=` never shadows the file's title.
//! [`LayeredConfig::merge`] walks the layers field by field and remembers which
//! layer supplied each value ([`Provenance`]).  Validation and key handling
//! happen afterwards in [`crate::resolver`].
//!
//! # File format
//!
//! ```toml
//! title         = "Nightly NAS"
//! command       = ""              # empty = incremental backup
//! directories   = ["Code", "Documents"]
//! do_full_after = 7               # full backup after 7 increments
//! keep_n_full   = 2               # remove-all-but-n-full 2
//!
//! [gpg]
//! fingerprint = "0123456789ABCDEF0123456789ABCDEF01234567"
//!
//! [source]
//! base_dir = "/volume1"
//!
//! [dest]
//! base_dir = "/backups/nas"
//! proto    = "sftp"
//! user     = "backup"
//! host     = "vault.lan"
//! port     = 22
//!
//! [email]
//! server    = "smtp.example.com"
//! sender    = "backup@example.com"
//! recipient = "ops@example.com"
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Prefix shared by every environment variable this tool reads.
pub const ENV_PREFIX: &str = "DUPBACK_";

// ─── Secrets ──────────────────────────────────────────────────────────────────

/// A string that never shows up in `Debug` output (`--print-config`, logs).
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

// ─── Layers ───────────────────────────────────────────────────────────────────

/// Where a resolved value came from.  Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Override,
    File,
    Environment,
    Default,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Override => "command line",
            Self::File => "config file",
            Self::Environment => "environment",
            Self::Default => "default",
        })
    }
}

/// Field name (dotted, as in the config file) → layer that supplied it.
pub type Provenance = BTreeMap<&'static str, Layer>;

/// Values that can be "present but blank" and must then count as unset.
pub trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Unset for Secret {
    fn is_unset(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Unset for i64 {
    fn is_unset(&self) -> bool {
        *self < 0
    }
}

impl Unset for bool {
    fn is_unset(&self) -> bool {
        false
    }
}

impl Unset for Vec<String> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

// ─── Partial (per-layer) config ───────────────────────────────────────────────

/// One configuration layer.  Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartialConfig {
    /// duplicity command, e.g. `full`, `restore`, `collection-status`.
    pub command: Option<String>,
    /// Extra arguments passed to duplicity after the command word.
    pub args: Option<Vec<String>>,
    /// Human-readable name of the job, used in the report subject.
    pub title: Option<String>,
    /// Directory names below `source.base_dir` to back up, one job each.
    pub directories: Option<Vec<String>>,
    /// Back up every first-level subdirectory of `source.base_dir` instead.
    pub all_subdirectories: Option<bool>,
    /// Force a full backup once this many increments exist (0 = never).
    pub do_full_after: Option<i64>,
    /// Keep this many full backups via `remove-all-but-n-full` (0 = never).
    pub keep_n_full: Option<i64>,
    /// tracing filter directive, e.g. `info` or `dupback=debug`.
    pub log_level: Option<String>,
    /// Path or name of the duplicity executable.
    pub engine: Option<String>,

    #[serde(default)]
    pub gpg: GpgSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub dest: DestSection,
    #[serde(default)]
    pub email: EmailSection,
}

/// `[gpg]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GpgSection {
    pub fingerprint: Option<String>,
    pub public_key_pem: Option<Secret>,
    pub private_key_pem: Option<Secret>,
    /// Path or name of the gpg executable.
    pub binary: Option<String>,
}

/// `[source]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceSection {
    pub base_dir: Option<String>,
}

/// `[dest]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DestSection {
    pub base_dir: Option<String>,
    pub proto: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    /// Explicit connection URI; when set, proto/user/host/port are not used
    /// to build one.
    pub uri: Option<String>,
}

/// `[email]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailSection {
    pub server: Option<String>,
    pub port: Option<i64>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub user: Option<String>,
    pub password: Option<Secret>,
}

impl PartialConfig {
    /// The built-in defaults layer.
    pub fn defaults() -> Self {
        Self {
            title: Some(default_title()),
            do_full_after: Some(0),
            keep_n_full: Some(0),
            all_subdirectories: Some(false),
            log_level: Some(default_log_level()),
            engine: Some(default_engine()),
            gpg: GpgSection {
                binary: Some(default_gpg_binary()),
                ..GpgSection::default()
            },
            email: EmailSection {
                port: Some(default_smtp_port()),
                ..EmailSection::default()
            },
            ..Self::default()
        }
    }

    /// Build a layer from `DUPBACK_*` variables.
    ///
    /// Nested keys use a double underscore: `DUPBACK_GPG__FINGERPRINT`,
    /// `DUPBACK_DEST__PORT`.  Lists accept a JSON array (`["a", "b"]`) or
    /// whitespace-separated words.  Unknown `DUPBACK_*` names are ignored.
    pub fn from_env<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cfg = Self::default();
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_uppercase();
            let ctx = || format!("invalid value for {name}");
            match key.as_str() {
                "COMMAND" => cfg.command = Some(value),
                "ARGS" => cfg.args = Some(parse_list(&value).with_context(ctx)?),
                "TITLE" => cfg.title = Some(value),
                "DIRECTORIES" => cfg.directories = Some(parse_list(&value).with_context(ctx)?),
                "ALL_SUBDIRECTORIES" => {
                    cfg.all_subdirectories = Some(parse_bool(&value).with_context(ctx)?);
                },
                "DO_FULL_AFTER" => cfg.do_full_after = Some(parse_int(&value).with_context(ctx)?),
                "KEEP_N_FULL" => cfg.keep_n_full = Some(parse_int(&value).with_context(ctx)?),
                "LOG_LEVEL" => cfg.log_level = Some(value),
                "ENGINE" => cfg.engine = Some(value),
                "GPG__FINGERPRINT" => cfg.gpg.fingerprint = Some(value),
                "GPG__PUBLIC_KEY_PEM" => cfg.gpg.public_key_pem = Some(Secret(value)),
                "GPG__PRIVATE_KEY_PEM" => cfg.gpg.private_key_pem = Some(Secret(value)),
                "GPG__BINARY" => cfg.gpg.binary = Some(value),
                "SOURCE__BASE_DIR" | "SOURCE__BASEDIR" => cfg.source.base_dir = Some(value),
                "DEST__BASE_DIR" | "DEST__BASEDIR" => cfg.dest.base_dir = Some(value),
                "DEST__PROTO" => cfg.dest.proto = Some(value),
                "DEST__USER" => cfg.dest.user = Some(value),
                "DEST__HOST" => cfg.dest.host = Some(value),
                "DEST__PORT" => cfg.dest.port = Some(parse_int(&value).with_context(ctx)?),
                "DEST__URI" => cfg.dest.uri = Some(value),
                "EMAIL__SERVER" => cfg.email.server = Some(value),
                "EMAIL__PORT" => cfg.email.port = Some(parse_int(&value).with_context(ctx)?),
                "EMAIL__SENDER" => cfg.email.sender = Some(value),
                "EMAIL__RECIPIENT" => cfg.email.recipient = Some(value),
                "EMAIL__USER" => cfg.email.user = Some(value),
                "EMAIL__PASSWORD" => cfg.email.password = Some(Secret(value)),
                _ => {},
            }
        }
        Ok(cfg)
    }
}

fn parse_list(value: &str) -> Result<Vec<String>> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("expected a JSON array of strings");
    }
    Ok(trimmed.split_whitespace().map(String::from).collect())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn parse_int(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        // Blank means "not set", same as the -1 sentinel.
        return Ok(-1);
    }
    trimmed
        .parse()
        .with_context(|| format!("expected an integer, got {trimmed:?}"))
}

// ─── Defaults ─────────────────────────────────────────────────────────────────

pub fn default_title() -> String {
    "Backup".into()
}

pub fn default_engine() -> String {
    "duplicity".into()
}

pub fn default_gpg_binary() -> String {
    "gpg".into()
}

pub fn default_log_level() -> String {
    "info".into()
}

pub fn default_smtp_port() -> i64 {
    587
}

// ─── Merging ──────────────────────────────────────────────────────────────────

/// The four layers of one run, kept in precedence order.
#[derive(Debug, Default)]
pub struct LayeredConfig {
    layers: Vec<(Layer, PartialConfig)>,
}

/// All layers collapsed into one, plus where each value came from.
#[derive(Debug, Default)]
pub struct Merged {
    pub values: PartialConfig,
    pub provenance: Provenance,
}

impl LayeredConfig {
    /// Add a layer.  Layers may be added in any order; a later call for the
    /// same [`Layer`] replaces the earlier one.
    #[must_use]
    pub fn with(mut self, layer: Layer, partial: PartialConfig) -> Self {
        self.layers.retain(|(l, _)| *l != layer);
        self.layers.push((layer, partial));
        self.layers.sort_by_key(|(l, _)| *l);
        self
    }

    /// First set value of one field, walking layers from highest precedence.
    fn pick<T>(
        &self,
        provenance: &mut Provenance,
        key: &'static str,
        get: impl Fn(&PartialConfig) -> Option<&T>,
    ) -> Option<T>
    where
        T: Unset + Clone,
    {
        self.layers.iter().find_map(|(layer, partial)| {
            let value = get(partial).filter(|v| !v.is_unset())?;
            provenance.insert(key, *layer);
            Some(value.clone())
        })
    }

    /// Effective log filter, available before full resolution so logging can
    /// be initialised first.
    pub fn log_level(&self) -> String {
        self.pick(&mut Provenance::new(), "log_level", |p| p.log_level.as_ref())
            .unwrap_or_else(default_log_level)
    }

    /// Effective gpg executable.
    pub fn gpg_binary(&self) -> String {
        self.pick(&mut Provenance::new(), "gpg.binary", |p| p.gpg.binary.as_ref())
            .unwrap_or_else(default_gpg_binary)
    }

    /// Collapse the layers field by field.
    pub fn merge(&self) -> Merged {
        let mut prov = Provenance::new();
        let p = &mut prov;
        let values = PartialConfig {
            command: self.pick(p, "command", |c| c.command.as_ref()),
            args: self.pick(p, "args", |c| c.args.as_ref()),
            title: self.pick(p, "title", |c| c.title.as_ref()),
            directories: self.pick(p, "directories", |c| c.directories.as_ref()),
            all_subdirectories: self.pick(p, "all_subdirectories", |c| {
                c.all_subdirectories.as_ref()
            }),
            do_full_after: self.pick(p, "do_full_after", |c| c.do_full_after.as_ref()),
            keep_n_full: self.pick(p, "keep_n_full", |c| c.keep_n_full.as_ref()),
            log_level: self.pick(p, "log_level", |c| c.log_level.as_ref()),
            engine: self.pick(p, "engine", |c| c.engine.as_ref()),
            gpg: GpgSection {
                fingerprint: self.pick(p, "gpg.fingerprint", |c| c.gpg.fingerprint.as_ref()),
                public_key_pem: self.pick(p, "gpg.public_key_pem", |c| {
                    c.gpg.public_key_pem.as_ref()
                }),
                private_key_pem: self.pick(p, "gpg.private_key_pem", |c| {
                    c.gpg.private_key_pem.as_ref()
                }),
                binary: self.pick(p, "gpg.binary", |c| c.gpg.binary.as_ref()),
            },
            source: SourceSection {
                base_dir: self.pick(p, "source.base_dir", |c| c.source.base_dir.as_ref()),
            },
            dest: DestSection {
                base_dir: self.pick(p, "dest.base_dir", |c| c.dest.base_dir.as_ref()),
                proto: self.pick(p, "dest.proto", |c| c.dest.proto.as_ref()),
                user: self.pick(p, "dest.user", |c| c.dest.user.as_ref()),
                host: self.pick(p, "dest.host", |c| c.dest.host.as_ref()),
                port: self.pick(p, "dest.port", |c| c.dest.port.as_ref()),
                uri: self.pick(p, "dest.uri", |c| c.dest.uri.as_ref()),
            },
            email: EmailSection {
                server: self.pick(p, "email.server", |c| c.email.server.as_ref()),
                port: self.pick(p, "email.port", |c| c.email.port.as_ref()),
                sender: self.pick(p, "email.sender", |c| c.email.sender.as_ref()),
                recipient: self.pick(p, "email.recipient", |c| c.email.recipient.as_ref()),
                user: self.pick(p, "email.user", |c| c.email.user.as_ref()),
                password: self.pick(p, "email.password", |c| c.email.password.as_ref()),
            },
        };
        Merged {
            values,
            provenance: prov,
        }
    }
}

// ─── Resolved config ──────────────────────────────────────────────────────────

/// The validated configuration of one run, built by [`crate::resolver::resolve`].
#[derive(Debug, Clone)]
pub struct Config {
    pub command: String,
    pub args: Vec<String>,
    pub title: String,
    pub directories: Vec<String>,
    pub do_full_after: u32,
    pub keep_n_full: u32,
    pub log_level: String,
    pub engine: String,
    pub gpg: GpgConfig,
    pub source: SourceConfig,
    pub dest: DestConfig,
    /// `None` disables notifications.
    pub email: Option<EmailConfig>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone)]
pub struct GpgConfig {
    pub fingerprint: String,
    pub public_key_pem: Option<Secret>,
    pub private_key_pem: Option<Secret>,
    pub binary: String,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DestConfig {
    pub base_dir: String,
    pub proto: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Connection URI, either given explicitly or derived.  Destination paths
    /// are appended to it verbatim.
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server: String,
    pub port: u16,
    pub sender: String,
    pub recipient: String,
    pub user: Option<String>,
    pub password: Option<Secret>,
}

// ─── Loader ───────────────────────────────────────────────────────────────────

/// Config files tried, in order, when `--config` is not given.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("dupback.toml")];
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join("dupback").join("config.toml"));
    }
    paths.push(PathBuf::from("/opt/backup.toml"));
    paths
}

/// Read one config file.  Returns `Ok(None)` when the file does not exist.
pub fn parse_partial(path: &Path) -> Result<Option<PartialConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(cfg))
}

/// Assemble all four layers.
///
/// An explicit `config_path` must exist.  With `no_defaults`, neither the
/// default file locations nor the built-in defaults layer are used.
pub fn load_layers(
    overrides: PartialConfig,
    config_path: Option<&Path>,
    no_defaults: bool,
) -> Result<LayeredConfig> {
    let file = match config_path {
        Some(path) => parse_partial(path)?
            .with_context(|| format!("config file '{}' not found", path.display()))?,
        None if no_defaults => PartialConfig::default(),
        None => {
            let mut found = PartialConfig::default();
            for path in default_config_paths() {
                if let Some(cfg) = parse_partial(&path)? {
                    found = cfg;
                    break;
                }
            }
            found
        },
    };

    let env = PartialConfig::from_env(std::env::vars())?;
    let defaults = if no_defaults {
        PartialConfig::default()
    } else {
        PartialConfig::defaults()
    };

    Ok(LayeredConfig::default()
        .with(Layer::Override, overrides)
        .with(Layer::File, file)
        .with(Layer::Environment, env)
        .with(Layer::Default, defaults))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
