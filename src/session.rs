//! Session Log: append-only durable tier for outcome records.
//!
//! One compact JSON record per line, rotated into bounded-size files named
//! by creation timestamp, with whole-file retention deletes. Overflow and
//! periodic flushes from the short-term buffer land here.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SessionConfig;
use crate::errors::Result;
use crate::training::{TrainingRecord, DEFAULT_SYSTEM_PROMPT};
use crate::types::{ActionContext, ActionOutcome, AgentAction, OutcomeRecord};

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".jsonl";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Compact on-disk shape of an outcome record, one per line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub ts: DateTime<Utc>,
    pub context: ActionContext,
    pub action: AgentAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&OutcomeRecord> for StoredRecord {
    fn from(record: &OutcomeRecord) -> Self {
        Self {
            ts: record.timestamp,
            context: record.context.clone(),
            action: record.action.clone(),
            success: record.outcome.success,
            msg: record.outcome.message.clone(),
            duration_ms: record.outcome.duration_ms,
            reason: record.reason.clone(),
        }
    }
}

impl From<StoredRecord> for OutcomeRecord {
    fn from(stored: StoredRecord) -> Self {
        Self {
            timestamp: stored.ts,
            context: stored.context,
            action: stored.action,
            outcome: ActionOutcome {
                success: stored.success,
                message: stored.msg,
                duration_ms: stored.duration_ms,
            },
            reason: stored.reason,
        }
    }
}

/// Export settings shared by session and archive exports
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Keep only successful outcomes
    pub success_only: bool,
    /// Cap on exported entries
    pub max_entries: Option<usize>,
    /// Override for the system message
    pub system_prompt: Option<String>,
}

impl ExportOptions {
    pub(crate) fn prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Listing entry for one session file
#[derive(Debug, Clone)]
pub struct SessionFileInfo {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub records: usize,
}

/// Append-only durable log of outcome records
pub struct SessionLog {
    dir: PathBuf,
    max_records_per_file: usize,
    retention_days: u32,
    current_path: Option<PathBuf>,
    current_count: usize,
}

impl SessionLog {
    /// Open a session log in `dir`, creating the directory if needed.
    ///
    /// Runs a retention pass and reuses the newest existing file with
    /// spare capacity instead of starting a new one.
    pub fn new(dir: impl Into<PathBuf>, config: &SessionConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut log = Self {
            dir,
            max_records_per_file: config.max_records_per_file.max(1),
            retention_days: config.retention_days,
            current_path: None,
            current_count: 0,
        };

        log.enforce_retention();

        if let Some((path, _)) = log.files_by_age().into_iter().next_back() {
            let count = count_lines(&path);
            if count < log.max_records_per_file {
                log.current_path = Some(path);
                log.current_count = count;
            }
        }

        Ok(log)
    }

    /// Append records to the open file, rotating whenever it fills up
    pub fn append_entries(&mut self, records: &[OutcomeRecord]) -> Result<usize> {
        let mut remaining = records;
        while !remaining.is_empty() {
            if self.current_path.is_none() || self.current_count >= self.max_records_per_file {
                self.current_path = Some(self.next_file_path());
                self.current_count = 0;
            }
            // Open handle is scoped to one chunk; rotation never overlaps.
            let path = self
                .current_path
                .clone()
                .unwrap_or_else(|| self.next_file_path());

            let space = self.max_records_per_file - self.current_count;
            let (chunk, rest) = remaining.split_at(space.min(remaining.len()));

            let mut lines = String::new();
            for record in chunk {
                let stored = StoredRecord::from(record);
                lines.push_str(&serde_json::to_string(&stored)?);
                lines.push('\n');
            }

            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(lines.as_bytes())?;
            file.flush()?;

            self.current_count += chunk.len();
            remaining = rest;
        }
        Ok(records.len())
    }

    /// Delete whole files older than the retention window.
    ///
    /// Never fails; individual delete errors are logged and skipped.
    /// Returns the number of files removed.
    pub fn enforce_retention(&mut self) -> usize {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        let mut removed = 0;

        for (path, created) in self.files_by_age() {
            if created < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        removed += 1;
                        if self.current_path.as_deref() == Some(path.as_path()) {
                            self.current_path = None;
                            self.current_count = 0;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to delete expired session file");
                    }
                }
            }
        }
        removed
    }

    /// Load up to `max_records` recent records, newest files first, stopping
    /// at the age cutoff. Returned oldest-first. Corrupt lines are skipped
    /// with a warning; I/O failures yield an empty result.
    pub fn load_recent(&self, max_records: usize, max_age_days: Option<f64>) -> Vec<OutcomeRecord> {
        let cutoff = max_age_days
            .map(|days| Utc::now() - Duration::milliseconds((days * 86_400_000.0) as i64));

        let mut files = self.files_by_age();
        files.reverse();

        let mut chunks: Vec<Vec<OutcomeRecord>> = Vec::new();
        let mut collected = 0;

        for (path, created) in files {
            if collected >= max_records {
                break;
            }
            if let Some(cutoff) = cutoff {
                if created < cutoff {
                    break;
                }
            }

            let mut records = read_records(&path);
            if let Some(cutoff) = cutoff {
                records.retain(|r| r.timestamp >= cutoff);
            }

            let need = max_records - collected;
            if records.len() > need {
                records = records.split_off(records.len() - need);
            }
            collected += records.len();
            chunks.push(records);
        }

        chunks.reverse();
        chunks.concat()
    }

    /// Export records as training-format lines into one flat file.
    ///
    /// Returns the number of entries written.
    pub fn export_training_file(&self, path: &Path, options: &ExportOptions) -> Result<usize> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = String::new();
        let mut written = 0;

        'files: for (file, _) in self.files_by_age() {
            for record in read_records(&file) {
                if options.success_only && !record.outcome.success {
                    continue;
                }
                let training = TrainingRecord::from_outcome(&record, options.prompt());
                out.push_str(&serde_json::to_string(&training)?);
                out.push('\n');
                written += 1;
                if options.max_entries.is_some_and(|max| written >= max) {
                    break 'files;
                }
            }
        }

        fs::write(path, out)?;
        Ok(written)
    }

    /// All session files with creation timestamp and record count, oldest first
    pub fn session_files(&self) -> Vec<SessionFileInfo> {
        self.files_by_age()
            .into_iter()
            .map(|(path, created)| SessionFileInfo {
                records: count_lines(&path),
                path,
                created,
            })
            .collect()
    }

    /// Directory holding the session files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session files sorted oldest first
    fn files_by_age(&self) -> Vec<(PathBuf, DateTime<Utc>)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list session directory");
                return Vec::new();
            }
        };

        let mut files: Vec<(PathBuf, DateTime<Utc>)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let created = parse_file_timestamp(&path)?;
                Some((path, created))
            })
            .collect();
        files.sort_by_key(|(_, created)| *created);
        files
    }

    /// Next rotation target, bumping the millisecond on name collisions
    fn next_file_path(&self) -> PathBuf {
        let mut ts = Utc::now();
        loop {
            let name = format!("{}{}{}", FILE_PREFIX, ts.format(TIMESTAMP_FORMAT), FILE_SUFFIX);
            let path = self.dir.join(name);
            if !path.exists() {
                return path;
            }
            ts += Duration::milliseconds(1);
        }
    }
}

/// Parse the creation timestamp encoded in a session file name
pub(crate) fn parse_file_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok()?;
    Some(naive.and_utc())
}

/// Read every parseable record from a session file, oldest first
pub(crate) fn read_records(path: &Path) -> Vec<OutcomeRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read session file");
            return Vec::new();
        }
    };

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<StoredRecord>(line) {
            Ok(stored) => Some(OutcomeRecord::from(stored)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt session record");
                None
            }
        })
        .collect()
}

fn count_lines(path: &Path) -> usize {
    match fs::read_to_string(path) {
        Ok(contents) => contents.lines().filter(|l| !l.trim().is_empty()).count(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to count session records");
            0
        }
    }
}
