//! SSH pre-flight: make sure the remote directory exists before duplicity
//! tries to write into it.
//!
//! Only destinations reached over SSH need this.  For those, we run
//!
//! ```text
//! ssh -p <port> -l <user> -o BatchMode=yes -o UpdateHostKeys=yes \
//!     -o StrictHostKeyChecking=accept-new <host> mkdir -p <path>
//! ```
//!
//! `BatchMode` means a missing key fails fast instead of prompting; SSH
//! access has to be set up ahead of time.

use thiserror::Error;
use tracing::{debug, info};

use crate::ui::{run_captured, with_spinner};

/// URI schemes (after any `backend+` prefix) that go through SSH.
pub const SSH_PROTOCOLS: [&str; 4] = ["ssh", "rsync", "sftp", "scp"];

/// Client executable.
pub const SSH_BINARY: &str = "ssh";

const SSH_OPTIONS: [&str; 3] = [
    "BatchMode=yes",
    "UpdateHostKeys=yes",
    "StrictHostKeyChecking=accept-new",
];

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("destination '{0}' has no host")]
    NoHost(String),

    #[error(transparent)]
    Spawn(#[from] anyhow::Error),

    #[error("{command} exited with code {code:?}\n{stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// The scheme of `uri` with any `backend+` prefix removed, lower-cased.
pub fn protocol(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once("://")?;
    scheme.rsplit('+').next().map(str::to_ascii_lowercase)
}

/// Whether `uri` needs the SSH pre-flight.
pub fn required(uri: &str) -> bool {
    protocol(uri).is_some_and(|p| SSH_PROTOCOLS.contains(&p.as_str()))
}

/// `[user@]host[:port]` taken from a URI's authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshTarget {
    pub fn from_uri(uri: &str) -> Option<Self> {
        let (_, rest) = uri.split_once("://")?;
        let authority = rest.split('/').next().unwrap_or_default();
        let (user, host_port) = match authority.rsplit_once('@') {
            Some((user, host_port)) => (Some(user.to_string()), host_port),
            None => (None, authority),
        };
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host, Some(port)),
                Err(_) => (host_port, None),
            },
            None => (host_port, None),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            user: user.filter(|u| !u.is_empty()),
            host: host.to_string(),
            port,
        })
    }
}

/// The `ssh … mkdir -p <path>` command line.
pub fn build_ssh_args(ssh: &str, target: &SshTarget, path: &str) -> Vec<String> {
    let mut args = vec![ssh.to_string()];
    if let Some(port) = target.port {
        args.extend(["-p".into(), port.to_string()]);
    }
    if let Some(user) = &target.user {
        args.extend(["-l".into(), user.clone()]);
    }
    for option in SSH_OPTIONS {
        args.extend(["-o".into(), option.into()]);
    }
    args.extend([
        target.host.clone(),
        "mkdir".into(),
        "-p".into(),
        path.into(),
    ]);
    args
}

/// Create `remote_path` on the host behind `uri` with the `ssh` client.
/// Returns `Ok(false)` when `uri` does not need it.
pub fn ensure_remote_dir(
    ssh: &str,
    uri: &str,
    remote_path: &str,
) -> Result<bool, PreflightError> {
    if !required(uri) {
        debug!("no SSH pre-flight needed for {uri}");
        return Ok(false);
    }
    let target = SshTarget::from_uri(uri).ok_or_else(|| PreflightError::NoHost(uri.into()))?;
    let args = build_ssh_args(ssh, &target, remote_path);

    let out = with_spinner(&format!("Preparing {}:{remote_path}", target.host), || {
        run_captured(&args, None)
    })?;
    if !out.success {
        return Err(PreflightError::Command {
            command: args.join(" "),
            code: out.code,
            stderr: out.stderr.trim_end().to_string(),
        });
    }
    info!("remote directory ready: {}:{remote_path}", target.host);
    Ok(true)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
