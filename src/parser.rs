//! Extraction of JSON statistics blobs from duplicity's text output.
//!
//! duplicity run with `--jsonstat` prints its statistics as a JSON object in
//! the middle of ordinary log text, possibly spread over several lines:
//!
//! ```text
//! Local and Remote metadata are synchronized, no sync needed.
//! {"Errors": 0, "DeltaEntries": 5,
//!  "backup_meta": {"source": "/volume1/Code", "no_of_inc": 3}}
//! ```
//!
//! [`BlobScanner`] finds every balanced `{…}` span with a depth counter, fed
//! chunk by chunk as the output streams in.  Braces inside JSON strings are
//! ignored.  [`parse_stat`] then turns one span into a
//! [`BackupStat`](crate::report::BackupStat).

use serde_json::Value;

use crate::report::{BackupStat, NO_SOURCE, UNSET};

/// Incremental balanced-brace scanner.
#[derive(Debug, Default)]
pub struct BlobScanner {
    depth: usize,
    current: String,
    in_string: bool,
    escaped: bool,
}

impl BlobScanner {
    /// Consume `chunk`, returning every span completed inside it.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut done = Vec::new();
        for ch in chunk.chars() {
            if self.depth == 0 {
                if ch == '{' {
                    self.depth = 1;
                    self.current.push(ch);
                }
                continue;
            }

            self.current.push(ch);

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        done.push(std::mem::take(&mut self.current));
                    }
                },
                _ => {},
            }
        }
        done
    }

    /// Whether an opened span is still waiting for its closing brace.
    pub fn pending(&self) -> bool {
        self.depth > 0
    }

    /// End of stream.  An unclosed span is dropped, but balanced spans nested
    /// after its opening brace are still recovered, in order.
    pub fn finish(&mut self) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = std::mem::take(&mut self.current);
        *self = Self::default();

        while !rest.is_empty() {
            // `rest` always starts with the unmatched '{'.
            let mut inner = Self::default();
            found.extend(inner.feed(&rest[1..]));
            rest = inner.current;
        }
        found
    }
}

/// Every balanced span in a complete piece of text.
pub fn extract_blobs(text: &str) -> Vec<String> {
    let mut scanner = BlobScanner::default();
    let mut blobs = scanner.feed(text);
    blobs.extend(scanner.finish());
    blobs
}

/// Parse one span into a statistics record.  Missing fields become
/// [`UNSET`] (or [`NO_SOURCE`]); only invalid JSON is an error.
pub fn parse_stat(blob: &str) -> Result<BackupStat, serde_json::Error> {
    let value: Value = serde_json::from_str(blob)?;
    Ok(stat_from_json(&value))
}

fn stat_from_json(value: &Value) -> BackupStat {
    let int = |v: Option<&Value>| v.and_then(Value::as_i64).unwrap_or(UNSET);
    let meta = value.get("backup_meta");
    BackupStat {
        source: meta
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
            .unwrap_or(NO_SOURCE)
            .to_string(),
        errors: int(value.get("Errors")),
        deltaentries: int(value.get("DeltaEntries")),
        no_of_inc: int(meta.and_then(|m| m.get("no_of_inc"))),
    }
}

/// Number of increments reported by `collection-status --jsonstat`.
///
/// The status output holds one object keyed by backup chain; the newest chain
/// is the last entry and carries `json_stat.backup_meta.no_of_inc`.  A flat
/// `backup_meta.no_of_inc` at the top level is accepted too.
pub fn increment_count(status_output: &str) -> Option<i64> {
    let first = extract_blobs(status_output).into_iter().next()?;
    let value: Value = serde_json::from_str(&first).ok()?;

    let from_last_chain = value
        .as_object()
        .and_then(|chains| chains.values().next_back())
        .and_then(|chain| chain.pointer("/json_stat/backup_meta/no_of_inc"))
        .and_then(Value::as_i64);

    from_last_chain.or_else(|| {
        value
            .pointer("/backup_meta/no_of_inc")
            .and_then(Value::as_i64)
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
