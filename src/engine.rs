//! The backup engine process.
//!
//! [`Engine`] is the seam between job orchestration ([`crate::runner`]) and
//! the actual `duplicity` executable.  Every invocation is
//!
//! ```text
//! <binary> --encrypt-key <fingerprint> <args…>
//! ```
//!
//! Long-running jobs are *streamed*: stdout is handed over line by line while
//! stderr is drained on a helper thread and kept for the error report.
//! Short auxiliary calls (status query, retention cleanup) are *captured*.

use std::{
    io::{self, BufRead, BufReader, Read},
    process::{Command, Stdio},
    thread,
};

use thiserror::Error;

use crate::ui::run_captured;

/// Separator framing the engine's stderr in the error report.
const PAYLOAD_RULE: &str = "==============";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("reading engine output: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Process(#[from] anyhow::Error),

    #[error("engine exited with code {code}")]
    Exit {
        /// `-1` when the process was killed by a signal.
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl EngineError {
    /// The text recorded in the report's error log.
    pub fn report_payload(&self) -> String {
        match self {
            Self::Exit { code, stderr, .. } => format!(
                "ERROR exitcode: {code}\n{PAYLOAD_RULE}\n{}\n{PAYLOAD_RULE}",
                stderr.trim_end()
            ),
            other => format!("ERROR: {other}"),
        }
    }
}

/// A backup engine that can run planned argument vectors.
pub trait Engine {
    /// The full command line for `args`, for log banners.
    fn describe(&self, args: &[String]) -> String;

    /// Run to completion, calling `on_line` for every stdout line (newline
    /// included) as it arrives.
    fn stream(&self, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<(), EngineError>;

    /// Run to completion and return stdout.
    fn capture(&self, args: &[String]) -> Result<String, EngineError>;
}

/// [`Engine`] backed by the `duplicity` executable.
#[derive(Debug, Clone)]
pub struct Duplicity {
    binary: String,
    fingerprint: String,
}

impl Duplicity {
    pub fn new(binary: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            fingerprint: fingerprint.into(),
        }
    }

    fn command_line(&self, args: &[String]) -> Vec<String> {
        let mut cmd = vec![
            self.binary.clone(),
            "--encrypt-key".into(),
            self.fingerprint.clone(),
        ];
        cmd.extend(args.iter().cloned());
        cmd
    }
}

impl Engine for Duplicity {
    fn describe(&self, args: &[String]) -> String {
        self.command_line(args).join(" ")
    }

    fn stream(&self, args: &[String], on_line: &mut dyn FnMut(&str)) -> Result<(), EngineError> {
        let mut child = Command::new(&self.binary)
            .arg("--encrypt-key")
            .arg(&self.fingerprint)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let read = child
            .stdout
            .take()
            .map_or(Ok(()), |stdout| read_lines(stdout, on_line));
        if read.is_err() {
            // Nobody drains stdout any more; don't let the child block on it.
            let _ = child.kill();
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        read?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Exit {
                code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr,
            })
        }
    }

    fn capture(&self, args: &[String]) -> Result<String, EngineError> {
        let out = run_captured(&self.command_line(args), None)?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(EngineError::Exit {
                code: out.code.unwrap_or(-1),
                stdout: out.stdout,
                stderr: out.stderr,
            })
        }
    }
}

/// Hand every line of `source` (newline included) to `on_line`.
fn read_lines(source: impl Read, on_line: &mut dyn FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        on_line(&String::from_utf8_lossy(&buf));
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
