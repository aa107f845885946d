//! Run report: parsed statistics, status, and plain-text / HTML rendering.
//!
//! A single [`Report`] lives for the whole run.  Engine output is streamed
//! into it with [`Report::feed`]; each completed JSON blob becomes one
//! [`BackupStat`].  At the end (or at a fatal abort) [`Report::finish`] turns
//! it into a [`Notification`] ready for a [`crate::notify::Notifier`].

use std::fmt;

use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use crate::parser::{BlobScanner, parse_stat};

/// Value of any statistic the engine did not report.
pub const UNSET: i64 = -1;

/// Source shown for a blob without `backup_meta.source`.
pub const NO_SOURCE: &str = "Error no source";

/// Source of the synthetic row used when nothing could be parsed.
pub const FATAL_SOURCE: &str = "Fatal Error";

/// Error attached when the run produced no statistics at all.
pub const NO_RESULTS: &str = "no results found in duplicity output";

/// Column headers, in row order.
pub const COLUMNS: [&str; 4] = ["source", "errors", "deltaentries", "no_of_inc"];

// ─── BackupStat ───────────────────────────────────────────────────────────────

/// One parsed statistics blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStat {
    pub source: String,
    pub errors: i64,
    pub deltaentries: i64,
    pub no_of_inc: i64,
}

impl BackupStat {
    /// The placeholder row for a run whose output could not be understood.
    pub fn fatal() -> Self {
        Self {
            source: FATAL_SOURCE.into(),
            errors: UNSET,
            deltaentries: UNSET,
            no_of_inc: UNSET,
        }
    }

    fn cells(&self) -> [String; 4] {
        [
            self.source.clone(),
            self.errors.to_string(),
            self.deltaentries.to_string(),
            self.no_of_inc.to_string(),
        ]
    }
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// Overall result of a run.  Only positive counts are summed; `-1` means
/// "not reported" and never counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok { changes: i64 },
    Error { errors: i64, changes: i64 },
    Fatal,
}

impl Status {
    pub fn of(stats: &[BackupStat]) -> Self {
        if stats.is_empty() {
            return Self::Fatal;
        }
        let errors: i64 = stats.iter().map(|s| s.errors.max(0)).sum();
        let changes: i64 = stats.iter().map(|s| s.deltaentries.max(0)).sum();
        if errors == 0 {
            Self::Ok { changes }
        } else {
            Self::Error { errors, changes }
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { changes } => write!(f, "OK: {changes} changes."),
            Self::Error { changes, .. } => write!(f, "ERROR: {changes} changes."),
            Self::Fatal => f.write_str(FATAL_SOURCE),
        }
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────

/// Everything collected during one run.
#[derive(Debug)]
pub struct Report {
    title: String,
    stats: Vec<BackupStat>,
    info: String,
    error: String,
    raw: String,
    scanner: BlobScanner,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            stats: Vec::new(),
            info: String::new(),
            error: String::new(),
            raw: String::new(),
            scanner: BlobScanner::default(),
        }
    }

    pub fn stats(&self) -> &[BackupStat] {
        &self.stats
    }

    pub fn status(&self) -> Status {
        Status::of(&self.stats)
    }

    /// Append a chunk of engine output.
    pub fn feed(&mut self, chunk: &str) {
        self.raw.push_str(chunk);
        for blob in self.scanner.feed(chunk) {
            self.absorb(&blob);
        }
    }

    /// Mark the end of one job's output.  Output never spans jobs, so a
    /// still-open blob is abandoned here.
    pub fn end_stream(&mut self) {
        if self.scanner.pending() {
            debug!("engine output ended inside an unclosed statistics blob");
        }
        for blob in self.scanner.finish() {
            self.absorb(&blob);
        }
    }

    fn absorb(&mut self, blob: &str) {
        match parse_stat(blob) {
            Ok(stat) => {
                debug!(source = %stat.source, errors = stat.errors, "parsed statistics");
                self.stats.push(stat);
            },
            Err(e) => warn!("skipping malformed statistics blob: {e}"),
        }
    }

    /// Append a paragraph to the informational log.
    pub fn add_info(&mut self, text: &str) {
        push_paragraph(&mut self.info, text);
    }

    /// Append a paragraph to the error log.
    pub fn add_error(&mut self, text: &str) {
        push_paragraph(&mut self.error, text);
    }

    /// Close the report using today's date.
    pub fn finish(self) -> Notification {
        self.finish_on(Local::now().date_naive())
    }

    /// Close the report.  An empty stat list becomes a single
    /// [`BackupStat::fatal`] row carrying the raw output for diagnosis.
    pub fn finish_on(mut self, date: NaiveDate) -> Notification {
        self.end_stream();
        let status = self.status();

        let (stats, info, error) = if self.stats.is_empty() {
            let mut info = self.raw;
            push_paragraph(&mut info, &self.info);
            let mut error = self.error;
            push_paragraph(&mut error, NO_RESULTS);
            (vec![BackupStat::fatal()], info, error)
        } else {
            (self.stats, self.info, self.error)
        };

        let header = format!("{status} - {}", self.title);
        Notification {
            subject: format!("{}: {status} - {}", self.title, date.format("%Y-%m-%d")),
            text: render_text(&header, &stats, &info, &error),
            html: render_html(&header, &stats, &info, &error),
            status: status.to_string(),
            title: self.title,
            stats,
            info,
            error,
        }
    }
}

fn push_paragraph(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(text);
}

// ─── Notification ─────────────────────────────────────────────────────────────

/// A finished report, rendered and ready to send.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub status: String,
    pub subject: String,
    pub stats: Vec<BackupStat>,
    pub info: String,
    pub error: String,
    pub text: String,
    pub html: String,
}

// ─── Rendering ────────────────────────────────────────────────────────────────

/// Plain-text body: header, error banner, info, then the table.
pub fn render_text(header: &str, stats: &[BackupStat], info: &str, error: &str) -> String {
    let mut out = format!("{header}\n");
    if !error.is_empty() {
        out.push_str(&format!("\n!!  {error} !!\n\n"));
    }
    if !info.is_empty() {
        out.push_str(info);
        if !info.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(&render_table(stats));
    out
}

/// Bordered, centred text table.
pub fn render_table(stats: &[BackupStat]) -> String {
    let rows: Vec<[String; 4]> = stats.iter().map(BackupStat::cells).collect();
    let mut widths = COLUMNS.map(|c| c.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let border = format!("+{border}+\n");
    let line = |cells: &[String]| {
        let inner = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!(" {cell:^w$} "))
            .collect::<Vec<_>>()
            .join("|");
        format!("|{inner}|\n")
    };

    let header: Vec<String> = COLUMNS.iter().map(|c| (*c).to_string()).collect();
    let mut out = border.clone();
    out.push_str(&line(&header));
    out.push_str(&border);
    for row in &rows {
        out.push_str(&line(row));
    }
    out.push_str(&border);
    out
}

/// HTML body: heading, red error, preformatted info, then the table.
pub fn render_html(header: &str, stats: &[BackupStat], info: &str, error: &str) -> String {
    let mut out = format!("<h1>{}</h1>\n", escape_html(header));
    if !error.is_empty() {
        out.push_str(&format!(
            "<b style='color:red;'><pre>{}</pre></b>\n",
            escape_html(error)
        ));
    }
    if !info.is_empty() {
        out.push_str(&format!("<p><pre>{}</pre></p>\n", escape_html(info)));
    }
    out.push_str("<table>\n  <thead>\n    <tr>\n");
    for column in COLUMNS {
        out.push_str(&format!("      <th>{column}</th>\n"));
    }
    out.push_str("    </tr>\n  </thead>\n  <tbody>\n");
    for stat in stats {
        out.push_str("    <tr>\n");
        for cell in stat.cells() {
            out.push_str(&format!("      <td>{}</td>\n", escape_html(&cell)));
        }
        out.push_str("    </tr>\n");
    }
    out.push_str("  </tbody>\n</table>\n");
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(source: &str, errors: i64, delta: i64, inc: i64) -> BackupStat {
        BackupStat {
            source: source.into(),
            errors,
            deltaentries: delta,
            no_of_inc: inc,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    // ── status ────────────────────────────────────────────────────────────────

    #[test]
    fn all_zero_errors_is_ok() {
        let status = Status::of(&[stat("/a", 0, 3, 1), stat("/b", 0, 4, 2)]);
        assert_eq!(status, Status::Ok { changes: 7 });
        assert_eq!(status.to_string(), "OK: 7 changes.");
    }

    #[test]
    fn any_error_is_error() {
        let status = Status::of(&[stat("/a", 0, 3, 1), stat("/b", 2, 1, 2)]);
        assert_eq!(status, Status::Error {
            errors: 2,
            changes: 4
        });
        assert_eq!(status.to_string(), "ERROR: 4 changes.");
    }

    #[test]
    fn sentinels_do_not_count() {
        let status = Status::of(&[stat("/a", UNSET, UNSET, UNSET)]);
        assert_eq!(status, Status::Ok { changes: 0 });
    }

    #[test]
    fn empty_is_fatal() {
        assert_eq!(Status::of(&[]), Status::Fatal);
    }

    // ── feeding ───────────────────────────────────────────────────────────────

    #[test]
    fn feed_collects_blobs_across_lines() {
        let mut report = Report::new("Nightly");
        report.feed("Starting backup\n");
        report.feed("{\"Errors\": 0, \"DeltaEntries\": 5,\n");
        report.feed(" \"backup_meta\": {\"source\": \"/a\", \"no_of_inc\": 3}}\n");
        report.feed("{\"Errors\": 1, \"backup_meta\": {\"source\": \"/b\"}}\n");
        assert_eq!(report.stats(), &[stat("/a", 0, 5, 3), stat("/b", 1, UNSET, UNSET)]);
    }

    #[test]
    fn malformed_blob_is_skipped_and_stream_continues() {
        let mut report = Report::new("Nightly");
        report.feed("{not json} then {\"Errors\": 0}\n");
        assert_eq!(report.stats().len(), 1);
        assert_eq!(report.stats()[0].errors, 0);
    }

    #[test]
    fn unfinished_blob_does_not_leak_into_next_job() {
        let mut report = Report::new("Nightly");
        report.feed("{\"Errors\": 0, ");
        report.end_stream();
        report.feed("\"x\": 1}\n{\"Errors\": 3}\n");
        assert_eq!(report.stats().len(), 1);
        assert_eq!(report.stats()[0].errors, 3);
    }

    // ── finishing ─────────────────────────────────────────────────────────────

    #[test]
    fn empty_report_becomes_fatal_error_row() {
        let mut report = Report::new("Nightly");
        report.feed("duplicity: command not understood\n");
        let n = report.finish_on(day());

        assert_eq!(n.stats, vec![BackupStat::fatal()]);
        assert_eq!(n.stats[0].source, "Fatal Error");
        assert_eq!(n.status, "Fatal Error");
        assert_eq!(n.error, NO_RESULTS);
        assert!(n.info.contains("command not understood"));
    }

    #[test]
    fn fatal_report_keeps_earlier_errors_first() {
        let mut report = Report::new("Nightly");
        report.add_error("ERROR exitcode: 23");
        let n = report.finish_on(day());
        assert!(n.error.starts_with("ERROR exitcode: 23\n"));
        assert!(n.error.ends_with(NO_RESULTS));
    }

    #[test]
    fn subject_embeds_title_status_and_date() {
        let mut report = Report::new("Nightly");
        report.feed("{\"Errors\": 0, \"DeltaEntries\": 12}");
        let n = report.finish_on(day());
        assert_eq!(n.subject, "Nightly: OK: 12 changes. - 2026-10-18");
        assert!(n.text.starts_with("OK: 12 changes. - Nightly\n"));
    }

    #[test]
    fn info_paragraphs_are_joined_by_newlines() {
        let mut report = Report::new("Nightly");
        report.add_info("Clean up: a");
        report.add_info("Clean up: b");
        report.feed("{\"Errors\": 0}");
        let n = report.finish_on(day());
        assert_eq!(n.info, "Clean up: a\nClean up: b");
    }

    // ── rendering ─────────────────────────────────────────────────────────────

    #[test]
    fn text_table_has_header_rows_and_borders() {
        let table = render_table(&[stat("/volume1/Code", 0, 5, 3), stat("/b", 2, UNSET, 12)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("+-"));
        assert!(lines[1].contains("source") && lines[1].contains("no_of_inc"));
        assert!(lines[3].contains("/volume1/Code"));
        assert!(lines[4].contains("-1"));
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn text_body_flags_errors() {
        let text = render_text("ERROR: 0 changes. - Nightly", &[stat("/a", 1, 0, 0)], "", "boom");
        assert!(text.contains("!!  boom !!"));
    }

    #[test]
    fn text_table_snapshot() {
        insta::assert_snapshot!(render_table(&[stat("/a", 2, 5, 3)]));
    }

    #[test]
    fn html_escapes_untrusted_text() {
        let html = render_html(
            "OK - <b>",
            &[stat("/data/<script>", 0, 0, 0)],
            "a & b",
            "",
        );
        assert!(html.contains("<h1>OK - &lt;b&gt;</h1>"));
        assert!(html.contains("<td>/data/&lt;script&gt;</td>"));
        assert!(html.contains("a &amp; b"));
        assert!(!html.contains("color:red"));
    }

    #[test]
    fn html_has_one_row_per_stat() {
        let html = render_html("h", &[stat("/a", 0, 0, 0), stat("/b", 0, 0, 0)], "", "");
        assert_eq!(html.matches("<tr>").count(), 3);
        assert_eq!(html.matches("<th>").count(), 4);
    }
}
