//! Terminal UI: spinners, captured command execution, and the run summary.
//!
//! Streamed engine output goes through `tracing` (see [`crate::runner`]).
//! Everything here is for the short, captured calls around it (key-store
//! queries, the increment-count status query, retention cleanup, the SSH
//! pre-flight) and for the per-directory summary printed at the end.
//!
//! Spinners draw on stderr and are hidden automatically when stderr is not a
//! terminal, so cron runs only see the log lines.

use std::{
    io::Write,
    process::{Command, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

// ─── Icons ───────────────────────────────────────────────────────────────────

/// Braille spinner frames, as in indicatif's default.
static SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn icon_ok() -> console::StyledObject<&'static str> {
    style("✓").green().bold()
}
fn icon_skip() -> console::StyledObject<&'static str> {
    style("–").yellow().bold()
}
fn icon_err() -> console::StyledObject<&'static str> {
    style("✗").red().bold()
}
fn icon_done() -> console::StyledObject<&'static str> {
    style("✓").cyan().bold()
}

// ─── Directory outcome ────────────────────────────────────────────────────────

/// What happened to one configured directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Skipped(String),
    Failed(String),
}

/// The outcome of one directory's job, for the final summary.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Directory name as configured, e.g. `"Documents"`.
    pub label: String,
    /// Operation that actually ran (after escalation), e.g. `"full"`.
    pub operation: String,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn done(label: &str, operation: &str) -> Self {
        Self {
            label: label.into(),
            operation: operation.into(),
            status: JobStatus::Done,
        }
    }

    pub fn skipped(label: &str, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operation: String::new(),
            status: JobStatus::Skipped(reason.into()),
        }
    }

    pub fn failed(label: &str, operation: &str, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operation: operation.into(),
            status: JobStatus::Failed(reason.into()),
        }
    }

    pub fn failed_run(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }

    /// One summary line, e.g. `✓  Code  (full)`.
    pub fn print(&self) {
        let op = if self.operation.is_empty() {
            String::new()
        } else {
            format!("  {}", style(format!("({})", self.operation)).dim())
        };
        match &self.status {
            JobStatus::Done => println!("  {}  {}{op}", icon_ok(), style(&self.label).bold()),
            JobStatus::Skipped(reason) => println!(
                "  {}  {}  {}",
                icon_skip(),
                style(&self.label).bold(),
                style(reason).dim()
            ),
            JobStatus::Failed(reason) => {
                println!("  {}  {}{op}", icon_err(), style(&self.label).bold());
                eprintln!("  {} {}", style("Error:").red().bold(), reason);
            },
        }
    }
}

// ─── Spinner ──────────────────────────────────────────────────────────────────

fn make_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::with_template("  {spinner:.cyan}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    pb.set_style(spinner_style);
    pb.set_message(format!("{}", style(label).dim()));
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Run `f` behind a spinner labelled `label`; the spinner is cleared when `f`
/// returns, whatever it returns.
pub fn with_spinner<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let spinner = make_spinner(label);
    let result = f();
    spinner.finish_and_clear();
    result
}

// ─── Captured execution ───────────────────────────────────────────────────────

/// Exit status and output of a captured command.
#[derive(Debug, Clone)]
pub struct Captured {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, capturing stdout and stderr.
///
/// `input`, when given, is written to the child's stdin, which is then closed.
/// Without it stdin is `/dev/null`, so nothing can ever prompt.
pub fn run_captured(args: &[String], input: Option<&str>) -> Result<Captured> {
    let (prog, rest) = args.split_first().context("cannot run an empty command")?;

    let mut child = Command::new(prog)
        .args(rest)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn: {prog}"))?;

    if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(text.as_bytes())
            .with_context(|| format!("writing stdin of {prog}"))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("waiting for {prog}"))?;

    Ok(Captured {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

// ─── Banners ──────────────────────────────────────────────────────────────────

/// `=====` rule as wide as `text`, used around the "Running: …" log line.
pub fn rule_for(text: &str) -> String {
    "=".repeat(text.chars().count())
}

/// Print the run heading before the first directory.
pub fn print_header(title: &str, directories: usize) {
    println!();
    println!(
        "  {}  {}",
        style(title).bold(),
        style(format!("({directories} directories)")).dim()
    );
}

/// Print the final summary after all directories have been handled.
pub fn print_summary(outcomes: &[JobOutcome]) {
    println!();
    for outcome in outcomes {
        outcome.print();
    }
    let failed: Vec<&JobOutcome> = outcomes.iter().filter(|o| o.failed_run()).collect();
    println!();
    if failed.is_empty() {
        println!(
            "  {} {}",
            icon_done(),
            style("All directories processed.").cyan().bold()
        );
    } else {
        eprintln!("  {}  {}", icon_err(), style("Backup failed.").red().bold());
        for o in &failed {
            eprintln!("    {} {}", icon_err(), style(&o.label).red());
        }
    }
    println!();
}

// ─── Tests ────────────────────────────────────────────────────────────────────
