//! Running planned jobs: escalation, streaming, and retention cleanup.
//!
//! [`JobRunner`] owns the policy around a single [`BackupJob`]:
//!
//! 1. **Escalation**: an incremental job becomes `full` once the destination
//!    holds `do_full_after` increments.  The count comes from a captured
//!    `collection-status` query; if that query fails the count is taken as 0.
//! 2. **Streaming**: engine stdout is logged line by line and fed to the
//!    [`Report`].
//! 3. **Retention**: after a job that wrote a backup set, and when
//!    `keep_n_full > 0`, older full chains are removed.
//!
//! Engine failures are returned to the caller unchanged; reporting them is
//! the pipeline's job ([`crate::commands::run`]).

use tracing::{error, info};

use crate::{
    config::Config,
    engine::{Engine, EngineError},
    parser::increment_count,
    planner::{BackupJob, Operation, retention_args, status_query_args},
    report::Report,
    ui::{rule_for, with_spinner},
};

/// Printed by duplicity when retention had nothing to remove.
pub const NOTHING_DELETED: &str = "No old backup sets found, nothing deleted";

/// Prefix for each line of cleanup output in the informational log.
const CLEANUP_INDENT: &str = "......... ";

pub struct JobRunner<'a> {
    cfg: &'a Config,
    engine: &'a dyn Engine,
}

impl<'a> JobRunner<'a> {
    pub fn new(cfg: &'a Config, engine: &'a dyn Engine) -> Self {
        Self { cfg, engine }
    }

    /// The operation that should actually run against `destination`.
    pub fn escalate(&self, operation: Operation, destination: &str) -> Operation {
        let threshold = self.cfg.do_full_after;
        if threshold == 0 || !operation.is_incremental() {
            return operation;
        }

        let count = self.increments(destination);
        if count >= i64::from(threshold) {
            info!("{count} increments at {destination} (limit {threshold}), running full backup");
            Operation::Full
        } else {
            info!("{count} increments at {destination} (limit {threshold})");
            operation
        }
    }

    fn increments(&self, destination: &str) -> i64 {
        let query = status_query_args(destination);
        match with_spinner("Checking increment count", || self.engine.capture(&query)) {
            Ok(out) => increment_count(&out).unwrap_or_else(|| {
                error!("no increment count in collection-status output for {destination}");
                0
            }),
            Err(e) => {
                error!("collection-status failed for {destination}: {e}");
                0
            },
        }
    }

    /// Run `job`, streaming its output into `report`, then apply retention.
    pub fn run(&self, job: &BackupJob, report: &mut Report) -> Result<(), EngineError> {
        let banner = format!("Running: {}", self.engine.describe(&job.args));
        let rule = rule_for(&banner);
        info!("{rule}");
        info!("{banner}");
        info!("{rule}");

        let streamed = self.engine.stream(&job.args, &mut |line: &str| {
            info!(target: "engine", "{}", line.trim_end());
            report.feed(line);
        });
        report.end_stream();
        streamed?;

        if job.operation.writes_backup() && self.cfg.keep_n_full > 0 {
            self.retain(&job.destination, report)?;
        }
        Ok(())
    }

    fn retain(&self, destination: &str, report: &mut Report) -> Result<(), EngineError> {
        let args = retention_args(self.cfg.keep_n_full, destination);
        let out = with_spinner("Removing old backup sets", || self.engine.capture(&args))?;
        if out.contains(NOTHING_DELETED) {
            info!("retention: nothing to remove at {destination}");
        } else {
            info!("retention: cleaned up {destination}");
            report.add_info(&cleanup_entry(destination, &out));
        }
        Ok(())
    }
}

/// `Clean up: <dest>` followed by the indented cleanup output.
fn cleanup_entry(destination: &str, output: &str) -> String {
    let mut entry = format!("Clean up: {destination}\n");
    for line in output.lines() {
        entry.push_str(CLEANUP_INDENT);
        entry.push_str(line);
        entry.push('\n');
    }
    entry
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::planner::{JobPaths, tests::make_cfg};

    /// Scripted engine: a fixed stream, a fixed status answer, and a record
    /// of every call.
    #[derive(Default)]
    struct FakeEngine {
        calls: RefCell<Vec<Vec<String>>>,
        status: Option<String>,
        output: String,
        exit: Option<i32>,
        cleanup: String,
    }

    impl FakeEngine {
        fn commands(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|c| c[0].clone()).collect()
        }
    }

    impl Engine for FakeEngine {
        fn describe(&self, args: &[String]) -> String {
            format!("fake {}", args.join(" "))
        }

        fn stream(
            &self,
            args: &[String],
            on_line: &mut dyn FnMut(&str),
        ) -> Result<(), EngineError> {
            self.calls.borrow_mut().push(args.to_vec());
            for line in self.output.split_inclusive('\n') {
                on_line(line);
            }
            match self.exit {
                Some(code) => Err(EngineError::Exit {
                    code,
                    stdout: String::new(),
                    stderr: "boom".into(),
                }),
                None => Ok(()),
            }
        }

        fn capture(&self, args: &[String]) -> Result<String, EngineError> {
            self.calls.borrow_mut().push(args.to_vec());
            if args[0] == "collection-status" {
                self.status.clone().ok_or_else(|| EngineError::Exit {
                    code: 1,
                    stdout: String::new(),
                    stderr: "no chains".into(),
                })
            } else {
                Ok(self.cleanup.clone())
            }
        }
    }

    fn status_with(increments: i64) -> Option<String> {
        Some(format!(
            "Collection Status\n{{\"chain\": {{\"json_stat\": {{\"backup_meta\": {{\"no_of_inc\": {increments}}}}}}}}}\n"
        ))
    }

    fn incremental() -> Operation {
        Operation::parse("")
    }

    // ── escalation ────────────────────────────────────────────────────────────

    #[test]
    fn escalates_at_threshold() {
        let mut cfg = make_cfg();
        cfg.do_full_after = 5;
        let engine = FakeEngine {
            status: status_with(5),
            ..FakeEngine::default()
        };
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(incremental(), "file:///b/Code"), Operation::Full);
        assert_eq!(engine.commands(), vec!["collection-status"]);
    }

    #[test]
    fn below_threshold_stays_incremental() {
        let mut cfg = make_cfg();
        cfg.do_full_after = 5;
        let engine = FakeEngine {
            status: status_with(4),
            ..FakeEngine::default()
        };
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(incremental(), "file:///b/Code"), incremental());
    }

    #[test]
    fn failed_status_query_counts_as_zero() {
        let mut cfg = make_cfg();
        cfg.do_full_after = 1;
        let engine = FakeEngine::default();
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(incremental(), "file:///b/Code"), incremental());
    }

    #[test]
    fn unparseable_status_counts_as_zero() {
        let mut cfg = make_cfg();
        cfg.do_full_after = 1;
        let engine = FakeEngine {
            status: Some("No backup chains found".into()),
            ..FakeEngine::default()
        };
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(incremental(), "file:///b/Code"), incremental());
    }

    #[test]
    fn zero_threshold_never_queries() {
        let cfg = make_cfg();
        let engine = FakeEngine::default();
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(incremental(), "file:///b/Code"), incremental());
        assert!(engine.commands().is_empty());
    }

    #[test]
    fn non_incremental_operations_are_never_escalated() {
        let mut cfg = make_cfg();
        cfg.do_full_after = 1;
        let engine = FakeEngine {
            status: status_with(10),
            ..FakeEngine::default()
        };
        let runner = JobRunner::new(&cfg, &engine);
        assert_eq!(runner.escalate(Operation::Restore, "file:///b/Code"), Operation::Restore);
        assert!(engine.commands().is_empty());
    }

    // ── running ───────────────────────────────────────────────────────────────

    fn job(cfg: &Config, command: &str) -> BackupJob {
        let paths = JobPaths::new(cfg, "Code");
        BackupJob::new(Operation::parse(command), &paths, &[])
    }

    #[test]
    fn run_feeds_output_into_report() {
        let cfg = make_cfg();
        let engine = FakeEngine {
            output: "Starting\n{\"Errors\": 0,\n \"DeltaEntries\": 4}\nDone\n".into(),
            ..FakeEngine::default()
        };
        let mut report = Report::new("Nightly");
        JobRunner::new(&cfg, &engine)
            .run(&job(&cfg, "full"), &mut report)
            .unwrap();
        assert_eq!(report.stats().len(), 1);
        assert_eq!(report.stats()[0].deltaentries, 4);
    }

    #[test]
    fn run_failure_is_returned_after_output_is_kept() {
        let cfg = make_cfg();
        let engine = FakeEngine {
            output: "{\"Errors\": 1}\n".into(),
            exit: Some(30),
            ..FakeEngine::default()
        };
        let mut report = Report::new("Nightly");
        let err = JobRunner::new(&cfg, &engine)
            .run(&job(&cfg, ""), &mut report)
            .unwrap_err();
        assert!(matches!(err, EngineError::Exit { code: 30, .. }));
        assert_eq!(report.stats().len(), 1);
    }

    #[test]
    fn retention_runs_after_backup_when_configured() {
        let mut cfg = make_cfg();
        cfg.keep_n_full = 2;
        let engine = FakeEngine {
            cleanup: "Deleting backup chain at time:\nTue Oct  6 2026\n".into(),
            ..FakeEngine::default()
        };
        let mut report = Report::new("Nightly");
        report.feed("{\"Errors\": 0}");
        JobRunner::new(&cfg, &engine)
            .run(&job(&cfg, ""), &mut report)
            .unwrap();

        assert_eq!(engine.commands(), vec!["backup", "remove-all-but-n-full"]);
        let retention = &engine.calls.borrow()[1];
        assert_eq!(retention[1], "2");

        let n = report.finish();
        assert!(n.info.starts_with("Clean up: sftp://backup@vault.lan:22//backups/Code\n"));
        assert!(n.info.contains("......... Deleting backup chain at time:"));
    }

    #[test]
    fn retention_with_nothing_deleted_adds_no_info() {
        let mut cfg = make_cfg();
        cfg.keep_n_full = 2;
        let engine = FakeEngine {
            cleanup: format!("{NOTHING_DELETED}\n"),
            ..FakeEngine::default()
        };
        let mut report = Report::new("Nightly");
        report.feed("{\"Errors\": 0}");
        JobRunner::new(&cfg, &engine)
            .run(&job(&cfg, "full"), &mut report)
            .unwrap();
        assert!(report.finish().info.is_empty());
    }

    #[test]
    fn retention_skipped_for_restore() {
        let mut cfg = make_cfg();
        cfg.keep_n_full = 2;
        let engine = FakeEngine::default();
        let mut report = Report::new("Nightly");
        JobRunner::new(&cfg, &engine)
            .run(&job(&cfg, "restore"), &mut report)
            .unwrap();
        assert_eq!(engine.commands(), vec!["restore"]);
    }

    #[test]
    fn cleanup_entry_indents_every_line() {
        assert_eq!(
            cleanup_entry("file:///b", "a\nb\n"),
            "Clean up: file:///b\n......... a\n......... b\n"
        );
    }
}
