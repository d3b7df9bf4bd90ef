/// Dated CSV review logs.
///
/// One file per calendar day per root: `<root>/.recall/recall-YYYY-MM-DD.csv`.
/// Rows are `checksum,success,recall[,prevChecksum[,timestamp]]`; a missing
/// timestamp falls back to midnight (UTC) of the date in the file name.
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use super::HistoryError;
use crate::types::{HistoryEntry, ReviewOutcome};

/// Recall values above this many days are treated as unparsable.
pub const MAX_RECALL_DAYS: f64 = 1e7;

/// Timestamps outside `-MAX_TIMESTAMP_MS..=MAX_TIMESTAMP_MS` are treated as
/// missing.
pub const MAX_TIMESTAMP_MS: i64 = i64::MAX / 4;

static LOG_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^recall-([0-9-]*)\.csv$").unwrap());

pub fn file_name(date: NaiveDate) -> String {
    format!("recall-{}.csv", date.format("%Y-%m-%d"))
}

/// Midnight UTC of the date encoded in a log file name, in milliseconds.
/// Names without a valid date map to `0`.
pub fn file_timestamp(name: &str) -> i64 {
    LOG_FILE_RE
        .captures(name)
        .and_then(|caps| NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// All log files in `dir`, oldest first. A missing directory has no logs.
pub fn list_log_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("[recall.history.load] Cannot list {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| LOG_FILE_RE.is_match(n))
        })
        .collect();
    files.sort();
    files
}

/// Parse one log file. Unreadable rows are skipped, malformed fields degrade
/// (unknown outcome becomes `None`, unparsable or out-of-range recall becomes
/// NaN, out-of-range timestamp uses the file date).
pub fn read_log_file(path: &Path) -> Result<Vec<HistoryEntry>, HistoryError> {
    let fallback = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(file_timestamp)
        .unwrap_or(0);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut entries = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[recall.history.row] Skipping {:?} row {}: {}", path, line + 1, e);
                continue;
            }
        };
        if let Some(entry) = parse_row(&record, fallback) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn parse_row(record: &csv::StringRecord, fallback_timestamp: i64) -> Option<HistoryEntry> {
    let field = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

    let checksum = field(0)?.to_string();
    let success = field(1)
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(ReviewOutcome::from_code);
    let recall = field(2)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|r| r.is_finite() && (0.0..=MAX_RECALL_DAYS).contains(r))
        .unwrap_or(f64::NAN);
    let prev_checksum = field(3).map(str::to_string);
    let timestamp = field(4)
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|ts| (-MAX_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(ts))
        .unwrap_or(fallback_timestamp);

    Some(HistoryEntry {
        checksum,
        timestamp,
        success,
        recall,
        prev_checksum,
    })
}

/// Every entry logged under `dir`, in file then row order.
pub fn load_dir(dir: &Path) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    for path in list_log_files(dir) {
        match read_log_file(&path) {
            Ok(rows) => entries.extend(rows),
            Err(e) => log::warn!("[recall.history.load] Skipping {:?}: {}", path, e),
        }
    }
    entries
}

/// Append handle on one day's log file.
pub struct LogSink {
    writer: csv::Writer<File>,
    date: NaiveDate,
    path: PathBuf,
}

impl LogSink {
    /// Open (creating the directory and file if needed) the log for `date`.
    pub fn open(dir: &Path, date: NaiveDate) -> Result<Self, HistoryError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name(date));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        log::debug!("[recall.history.sink] Opened {:?}", path);
        Ok(Self { writer, date, path })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one row and hand it to the OS.
    pub fn append(&mut self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let success = entry
            .success
            .map(|outcome| outcome.code().to_string())
            .unwrap_or_default();
        let recall = entry.recall.to_string();
        let timestamp = entry.timestamp.to_string();

        self.writer.write_record([
            entry.checksum.as_str(),
            success.as_str(),
            recall.as_str(),
            entry.prev_checksum.as_deref().unwrap_or(""),
            timestamp.as_str(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), HistoryError> {
        self.writer.flush()?;
        Ok(())
    }
}
