//! Default pipeline: runs when no subcommand is given.
//!
//! # Per directory (in configured order)
//!
//! | # | Step      | On failure                                       |
//! |---|-----------|--------------------------------------------------|
//! | 1 | Source    | missing source tree: logged, directory skipped   |
//! | 2 | Pre-flight| SSH `mkdir -p`: report sent, run aborted         |
//! | 3 | Escalate  | status query failure: logged, count taken as 0   |
//! | 4 | Run       | engine exit ≠ 0: report sent, run aborted        |
//! | 5 | Retention | cleanup exit ≠ 0: report sent, run aborted       |
//!
//! Steps 3 to 5 live in [`JobRunner`].  All directories share one
//! [`Report`], which is delivered exactly once: after the last directory, or
//! at the point of abort.

use anyhow::{Result, anyhow, bail};
use tracing::{error, warn};

use crate::{
    config::Config,
    engine::{Duplicity, Engine},
    notify::{self, Notifier},
    planner::{BackupJob, JobPaths, Operation},
    preflight,
    report::Report,
    runner::JobRunner,
    ui::{JobOutcome, print_header, print_summary},
};

const SSH_HELP: &str = "You must setup and test SSH ahead of time. See below for errors:";

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Run every configured directory with duplicity and deliver the report.
pub fn run(cfg: &Config) -> Result<()> {
    let engine = Duplicity::new(&cfg.engine, &cfg.gpg.fingerprint);
    let notifier = notify::from_config(cfg);
    run_with(cfg, &engine, notifier.as_ref(), preflight::SSH_BINARY)
}

/// [`run`] with the engine, notifier and `ssh` client supplied by the caller.
pub fn run_with(cfg: &Config, engine: &dyn Engine, notifier: &dyn Notifier, ssh: &str) -> Result<()> {
    print_header(&cfg.title, cfg.directories.len());

    let runner = JobRunner::new(cfg, engine);
    let mut report = Report::new(&cfg.title);
    let planned = Operation::parse(&cfg.command);
    let mut outcomes: Vec<JobOutcome> = Vec::new();

    for name in &cfg.directories {
        let paths = JobPaths::new(cfg, name);

        // 1. Source
        if planned.reads_source() && !paths.source.exists() {
            warn!("source {} does not exist, skipping", paths.source.display());
            outcomes.push(JobOutcome::skipped(name, "source missing"));
            continue;
        }

        // 2. Pre-flight
        if let Err(e) = preflight::ensure_remote_dir(ssh, &cfg.dest.uri, &paths.remote_path) {
            let message = format!("{SSH_HELP}\n{e}");
            error!("{message}");
            report.add_error(&message);
            outcomes.push(JobOutcome::failed(name, planned.word(), "SSH pre-flight failed"));
            return abort(report, notifier, &outcomes, "SSH pre-flight failed");
        }

        // 3-5. Escalate, run, retention
        let operation = runner.escalate(planned.clone(), &paths.destination);
        let job = BackupJob::new(operation, &paths, &cfg.args);
        match runner.run(&job, &mut report) {
            Ok(()) => outcomes.push(JobOutcome::done(name, job.operation.word())),
            Err(e) => {
                error!("{name}: {e}");
                report.add_error(&e.report_payload());
                outcomes.push(JobOutcome::failed(name, job.operation.word(), e.to_string()));
                return abort(report, notifier, &outcomes, &format!("{name}: {e}"));
            },
        }
    }

    let sent = deliver(notifier, report);
    print_summary(&outcomes);
    sent
}

/// Send what has been collected so far, then fail with `reason`.
fn abort(report: Report, notifier: &dyn Notifier, outcomes: &[JobOutcome], reason: &str) -> Result<()> {
    // Delivery failures are already logged by `deliver`.
    let _ = deliver(notifier, report);
    print_summary(outcomes);
    bail!("backup aborted: {reason}")
}

fn deliver(notifier: &dyn Notifier, report: Report) -> Result<()> {
    let notification = report.finish();
    notify::dispatch(notifier, &notification).map_err(|e| {
        error!("could not deliver the report: {e}");
        anyhow!("could not deliver the report: {e}")
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
