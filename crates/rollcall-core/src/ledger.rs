//! Per-session attendance ledger.
//!
//! Tracks the expected/attended roster partition and appends one CSV row per
//! newly-present identity to a log file scoped to the calendar day. A name is
//! logged at most once per session; sessions started on the same day append
//! to the same file.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOG_HEADER: [&str; 3] = ["Name", "Timestamp", "Status"];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const STATUS_PRESENT: &str = "Present";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot create logs directory {path}: {source}")]
    LogsDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to append attendance record to {path}: {source}")]
    LogWrite { path: PathBuf, source: csv::Error },
}

/// End-of-session roll call: how many were marked present, who never showed.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub present_count: usize,
    pub absent_names: Vec<String>,
}

/// Mutable session state: who is still expected, who has been marked
/// present, and where the day's log lives.
///
/// Invariant: `expected` and `attended` are disjoint, and their union is the
/// roster snapshot as of the last `start`/`enroll` call.
#[derive(Debug)]
pub struct SessionLedger {
    expected: BTreeSet<String>,
    attended: BTreeSet<String>,
    log_path: PathBuf,
}

impl SessionLedger {
    /// Open a session for `date` over the given roster. The log file is not
    /// touched until the first record.
    pub fn start(
        names: impl IntoIterator<Item = String>,
        logs_dir: &Path,
        date: NaiveDate,
    ) -> Result<Self, LedgerError> {
        fs::create_dir_all(logs_dir).map_err(|source| LedgerError::LogsDir {
            path: logs_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            expected: names.into_iter().collect(),
            attended: BTreeSet::new(),
            log_path: logs_dir.join(format!("attendance_{}.csv", date.format("%Y-%m-%d"))),
        })
    }

    /// Mark `name` present, once. Returns `false` without touching anything
    /// if the name is already attended.
    ///
    /// The in-memory sets are updated before the file append and are NOT
    /// rolled back if the append fails: the log is append-only and a repeat
    /// row is worse than a missing one on a disk-full day.
    pub fn record_if_new(
        &mut self,
        name: &str,
        timestamp: NaiveDateTime,
    ) -> Result<bool, LedgerError> {
        if self.attended.contains(name) {
            return Ok(false);
        }

        self.expected.remove(name);
        self.attended.insert(name.to_string());
        self.append_record(name, timestamp)?;
        Ok(true)
    }

    /// Extend the roster with a newly enrolled name. No-op (returns `false`)
    /// when the name is already expected or already attended.
    pub fn enroll(&mut self, name: &str) -> bool {
        if self.expected.contains(name) || self.attended.contains(name) {
            return false;
        }
        self.expected.insert(name.to_string());
        true
    }

    pub fn remaining(&self) -> &BTreeSet<String> {
        &self.expected
    }

    pub fn attended(&self) -> &BTreeSet<String> {
        &self.attended
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            present_count: self.attended.len(),
            absent_names: self.expected.iter().cloned().collect(),
        }
    }

    /// Append one record, writing the header first when the file is
    /// new/empty. Flushed per write so an abrupt exit loses at most the row
    /// in flight.
    fn append_record(&self, name: &str, timestamp: NaiveDateTime) -> Result<(), LedgerError> {
        let log_write = |source: csv::Error| LedgerError::LogWrite {
            path: self.log_path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| log_write(e.into()))?;
        let is_empty = file
            .metadata()
            .map_err(|e| log_write(e.into()))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(LOG_HEADER).map_err(log_write)?;
        }
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        writer
            .write_record([name, stamp.as_str(), STATUS_PRESENT])
            .map_err(log_write)?;
        writer.flush().map_err(|e| log_write(e.into()))?;

        tracing::info!(name, path = %self.log_path.display(), "attendance recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn start(names: &[&str], dir: &Path) -> SessionLedger {
        SessionLedger::start(
            names.iter().map(|s| s.to_string()),
            dir,
            ts().date(),
        )
        .unwrap()
    }

    #[test]
    fn test_log_path_scoped_to_date() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = start(&["Alice"], tmp.path());
        assert_eq!(
            ledger.log_path().file_name().unwrap(),
            "attendance_2024-03-11.csv"
        );
    }

    #[test]
    fn test_record_moves_name_and_writes_row() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = start(&["Alice"], tmp.path());

        assert!(ledger.record_if_new("Alice", ts()).unwrap());
        assert!(ledger.remaining().is_empty());
        assert!(ledger.attended().contains("Alice"));

        let contents = fs::read_to_string(ledger.log_path()).unwrap();
        assert_eq!(
            contents,
            "Name,Timestamp,Status\nAlice,2024-03-11 09:30:00,Present\n"
        );
    }

    #[test]
    fn test_repeat_record_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = start(&["Alice", "Bob"], tmp.path());

        assert!(ledger.record_if_new("Alice", ts()).unwrap());
        assert!(!ledger.record_if_new("Alice", ts()).unwrap());
        assert!(!ledger.record_if_new("Alice", ts()).unwrap());

        let contents = fs::read_to_string(ledger.log_path()).unwrap();
        assert_eq!(contents.matches("Alice").count(), 1);
        assert!(ledger.remaining().contains("Bob"));
    }

    #[test]
    fn test_same_day_sessions_share_file_single_header() {
        let tmp = tempfile::tempdir().unwrap();

        let mut morning = start(&["Alice", "Bob"], tmp.path());
        morning.record_if_new("Alice", ts()).unwrap();

        let mut afternoon = start(&["Alice", "Bob"], tmp.path());
        afternoon.record_if_new("Bob", ts()).unwrap();

        let contents = fs::read_to_string(afternoon.log_path()).unwrap();
        assert_eq!(contents.matches("Name,Timestamp,Status").count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_roster_partition_invariant() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = start(&["Alice", "Bob", "Carol"], tmp.path());

        let check = |l: &SessionLedger, total: usize| {
            assert!(l.remaining().is_disjoint(l.attended()));
            assert_eq!(l.remaining().len() + l.attended().len(), total);
        };

        check(&ledger, 3);
        ledger.record_if_new("Bob", ts()).unwrap();
        check(&ledger, 3);
        ledger.enroll("Dan");
        check(&ledger, 4);
        ledger.record_if_new("Dan", ts()).unwrap();
        check(&ledger, 4);
    }

    #[test]
    fn test_enroll_dedupes_against_both_sets() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = start(&["Alice"], tmp.path());

        assert!(!ledger.enroll("Alice"));
        ledger.record_if_new("Alice", ts()).unwrap();
        assert!(!ledger.enroll("Alice"));
        assert!(ledger.enroll("Bob"));
        assert!(!ledger.enroll("Bob"));
    }

    #[test]
    fn test_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ledger = start(&["Alice", "Bob", "Carol"], tmp.path());
        ledger.record_if_new("Bob", ts()).unwrap();

        let summary = ledger.summary();
        assert_eq!(summary.present_count, 1);
        assert_eq!(summary.absent_names, vec!["Alice", "Carol"]);
    }

    #[test]
    fn test_log_file_untouched_until_first_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = start(&["Alice"], tmp.path());
        assert!(!ledger.log_path().exists());
    }
}
