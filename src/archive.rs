//! Cold Archive: permanent, compressed, per-month training data.
//!
//! Session files older than the current month are converted into the
//! training-record format and folded into one gzip file per calendar
//! month. Archives are append-safe under compression (decompress, append,
//! recompress) and are never deleted automatically.

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::session::{read_records, ExportOptions, SessionLog};
use crate::training::TrainingRecord;

const ARCHIVE_PREFIX: &str = "archive_";
const ARCHIVE_SUFFIX: &str = ".jsonl.gz";
const PLAINTEXT_SUFFIX: &str = ".jsonl";

/// Rough bytes per compressed training record, used to estimate entry
/// counts without a full decompression pass
const BYTES_PER_RECORD_ESTIMATE: u64 = 200;

/// Listing entry for one archive file
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Calendar month, `YYYY-MM`
    pub month: String,
    pub path: PathBuf,
    /// Entry count; exact for plaintext leftovers, estimated for
    /// compressed files
    pub entries: usize,
    pub estimated: bool,
    pub size_bytes: u64,
}

/// Permanent compressed tier for month-old session data
pub struct ColdArchive {
    dir: PathBuf,
}

impl ColdArchive {
    /// Open an archive rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Fold every session file from a completed month into that month's
    /// archive, deleting the source files on success.
    ///
    /// Never fails; a month that cannot be archived is logged and skipped.
    /// Returns `(month, records archived)` per archived month.
    pub fn archive_completed_months(
        &self,
        log: &SessionLog,
        system_prompt: &str,
    ) -> Vec<(String, usize)> {
        let current_month = Utc::now().format("%Y-%m").to_string();

        let mut by_month: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for info in log.session_files() {
            let month = info.created.format("%Y-%m").to_string();
            if month < current_month {
                by_month.entry(month).or_default().push(info.path);
            }
        }

        let mut archived = Vec::new();
        for (month, files) in by_month {
            let mut lines = Vec::new();
            for file in &files {
                for record in read_records(file) {
                    let training = TrainingRecord::from_outcome(&record, system_prompt);
                    match serde_json::to_string(&training) {
                        Ok(line) => lines.push(line),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize training record");
                        }
                    }
                }
            }

            match self.append_month(&month, &lines) {
                Ok(()) => {
                    for file in &files {
                        if let Err(e) = fs::remove_file(file) {
                            tracing::warn!(path = %file.display(), error = %e, "failed to delete archived session file");
                        }
                    }
                    tracing::debug!(month = %month, records = lines.len(), "archived month");
                    archived.push((month, lines.len()));
                }
                Err(e) => {
                    tracing::warn!(month = %month, error = %e, "failed to archive month, keeping session files");
                }
            }
        }
        archived
    }

    /// Append training lines to one month's archive, preserving append-only
    /// semantics under compression: write plaintext (existing content plus
    /// new lines), stream-compress it, then delete the plaintext.
    fn append_month(&self, month: &str, lines: &[String]) -> Result<()> {
        let gz_path = self.archive_path(month);
        let plain_path = self.plaintext_path(month);

        let mut contents = String::new();
        if gz_path.exists() {
            let mut decoder = GzDecoder::new(File::open(&gz_path)?);
            decoder.read_to_string(&mut contents)?;
        }
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }

        fs::write(&plain_path, &contents)?;

        let tmp_gz = gz_path.with_extension("gz.tmp");
        {
            let mut encoder = GzEncoder::new(File::create(&tmp_gz)?, Compression::default());
            let mut plain = File::open(&plain_path)?;
            std::io::copy(&mut plain, &mut encoder)?;
            encoder.finish()?;
        }
        fs::rename(&tmp_gz, &gz_path)?;
        fs::remove_file(&plain_path)?;
        Ok(())
    }

    /// Enumerate archive files, oldest month first.
    ///
    /// Compressed entry counts are estimated from the file size to avoid a
    /// full decompression pass; plaintext leftovers from an interrupted run
    /// are counted exactly.
    pub fn list_archives(&self) -> Vec<ArchiveInfo> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list archive directory");
                return Vec::new();
            }
        };

        let mut archives: Vec<ArchiveInfo> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?;
                let size_bytes = entry.metadata().ok()?.len();

                if let Some(month) = name
                    .strip_prefix(ARCHIVE_PREFIX)
                    .and_then(|s| s.strip_suffix(ARCHIVE_SUFFIX))
                {
                    Some(ArchiveInfo {
                        month: month.to_string(),
                        entries: (size_bytes / BYTES_PER_RECORD_ESTIMATE) as usize,
                        estimated: true,
                        size_bytes,
                        path,
                    })
                } else if let Some(month) = name
                    .strip_prefix(ARCHIVE_PREFIX)
                    .and_then(|s| s.strip_suffix(PLAINTEXT_SUFFIX))
                {
                    let entries = fs::read_to_string(&path)
                        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
                        .unwrap_or(0);
                    Some(ArchiveInfo {
                        month: month.to_string(),
                        entries,
                        estimated: false,
                        size_bytes,
                        path,
                    })
                } else {
                    None
                }
            })
            .collect();

        archives.sort_by(|a, b| a.month.cmp(&b.month));
        archives
    }

    /// Stream every archive's records into one flat training file.
    ///
    /// Never fails; unreadable archives and corrupt lines are logged and
    /// skipped. Returns the number of entries written.
    pub fn export_combined_dataset(&self, out: &Path, options: &ExportOptions) -> usize {
        let mut output = String::new();
        let mut written = 0;

        'archives: for info in self.list_archives() {
            for line in self.read_archive_lines(&info.path) {
                let mut record: TrainingRecord = match serde_json::from_str(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(path = %info.path.display(), error = %e, "skipping corrupt archive record");
                        continue;
                    }
                };

                if options.success_only && !record.success {
                    continue;
                }
                if let Some(prompt) = &options.system_prompt {
                    if let Some(system) = record.messages.first_mut() {
                        system.content = prompt.clone();
                    }
                }

                match serde_json::to_string(&record) {
                    Ok(line) => {
                        output.push_str(&line);
                        output.push('\n');
                        written += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize export record");
                    }
                }

                if options.max_entries.is_some_and(|max| written >= max) {
                    break 'archives;
                }
            }
        }

        if let Err(e) = fs::write(out, output) {
            tracing::warn!(path = %out.display(), error = %e, "failed to write combined dataset");
            return 0;
        }
        written
    }

    /// Delete the oldest archives beyond `max_months`. Only runs when asked;
    /// archives are otherwise retained forever. Returns files removed.
    pub fn prune_archives(&self, max_months: usize) -> usize {
        let mut archives = self.list_archives();
        archives.sort_by(|a, b| b.month.cmp(&a.month));

        let mut removed = 0;
        for info in archives.into_iter().skip(max_months) {
            match fs::remove_file(&info.path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %info.path.display(), error = %e, "failed to prune archive");
                }
            }
        }
        removed
    }

    /// Directory holding the archive files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn archive_path(&self, month: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", ARCHIVE_PREFIX, month, ARCHIVE_SUFFIX))
    }

    fn plaintext_path(&self, month: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", ARCHIVE_PREFIX, month, PLAINTEXT_SUFFIX))
    }

    fn read_archive_lines(&self, path: &Path) -> Vec<String> {
        let is_compressed = path
            .to_str()
            .is_some_and(|p| p.ends_with(ARCHIVE_SUFFIX));

        let contents = if is_compressed {
            File::open(path)
                .map_err(crate::errors::LearningError::from)
                .and_then(|file| {
                    let mut decoder = GzDecoder::new(file);
                    let mut contents = String::new();
                    decoder.read_to_string(&mut contents)?;
                    Ok(contents)
                })
        } else {
            fs::read_to_string(path).map_err(crate::errors::LearningError::from)
        };

        match contents {
            Ok(contents) => contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read archive");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::StoredRecord;
    use crate::training::DEFAULT_SYSTEM_PROMPT;
    use crate::types::{
        ActionContext, ActionOutcome, AgentAction, OutcomeRecord, Position, TimeOfDay,
    };
    use chrono::{DateTime, Duration};
    use tempfile::TempDir;

    fn ctx() -> ActionContext {
        ActionContext {
            position: Position { x: 0.0, y: 64.0, z: 0.0 },
            health: 20.0,
            food: 20.0,
            inventory: Vec::new(),
            nearby_blocks: Vec::new(),
            nearby_entities: Vec::new(),
            time_of_day: TimeOfDay::Day,
            underground: false,
        }
    }

    /// Write a session file with the given creation timestamp directly,
    /// bypassing rotation, so tests can back-date files into past months.
    fn write_session_file(dir: &Path, created: DateTime<Utc>, n: usize, success: bool) {
        let name = format!("session_{}.jsonl", created.format("%Y%m%d%H%M%S%3f"));
        let mut lines = String::new();
        for i in 0..n {
            let record = OutcomeRecord {
                timestamp: created,
                context: ctx(),
                action: AgentAction::new("mine", format!("target_{}", i)),
                outcome: ActionOutcome {
                    success,
                    message: String::new(),
                    duration_ms: 100,
                },
                reason: None,
            };
            lines.push_str(&serde_json::to_string(&StoredRecord::from(&record)).unwrap());
            lines.push('\n');
        }
        fs::write(dir.join(name), lines).unwrap();
    }

    /// Session log with retention long enough to keep back-dated files
    fn open_log(dir: &Path) -> SessionLog {
        let config = SessionConfig {
            max_records_per_file: 1000,
            retention_days: 3650,
        };
        SessionLog::new(dir, &config).unwrap()
    }

    fn decompressed_line_count(path: &Path) -> usize {
        let mut decoder = GzDecoder::new(File::open(path).unwrap());
        let mut contents = String::new();
        decoder.read_to_string(&mut contents).unwrap();
        contents.lines().count()
    }

    #[test]
    fn test_archives_only_completed_months() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();

        write_session_file(&sessions, Utc::now() - Duration::days(40), 5, true);
        write_session_file(&sessions, Utc::now(), 3, true);

        let log = open_log(&sessions);
        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();
        let archived = archive.archive_completed_months(&log, DEFAULT_SYSTEM_PROMPT);

        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].1, 5);

        // The old file is gone, the current-month file remains.
        assert_eq!(log.session_files().len(), 1);

        let listed = archive.list_archives();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].estimated);
        assert_eq!(decompressed_line_count(&listed[0].path), 5);
    }

    #[test]
    fn test_archive_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();
        write_session_file(&sessions, Utc::now() - Duration::days(40), 4, true);

        let log = open_log(&sessions);
        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();

        let first = archive.archive_completed_months(&log, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(first.len(), 1);

        // No new session data: the second pass archives nothing and the
        // archive gains no duplicate entries.
        let second = archive.archive_completed_months(&log, DEFAULT_SYSTEM_PROMPT);
        assert!(second.is_empty());

        let listed = archive.list_archives();
        assert_eq!(listed.len(), 1);
        assert_eq!(decompressed_line_count(&listed[0].path), 4);
    }

    #[test]
    fn test_append_to_existing_month_archive() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();
        let last_month = Utc::now() - Duration::days(40);

        write_session_file(&sessions, last_month, 3, true);
        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();
        archive.archive_completed_months(&open_log(&sessions), DEFAULT_SYSTEM_PROMPT);

        // A second file from the same month shows up later.
        write_session_file(&sessions, last_month + Duration::hours(1), 2, true);
        archive.archive_completed_months(&open_log(&sessions), DEFAULT_SYSTEM_PROMPT);

        let listed = archive.list_archives();
        assert_eq!(listed.len(), 1);
        assert_eq!(decompressed_line_count(&listed[0].path), 5);
    }

    #[test]
    fn test_month_extracted_from_filename() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();
        let created = Utc::now() - Duration::days(40);
        write_session_file(&sessions, created, 1, true);

        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();
        archive.archive_completed_months(&open_log(&sessions), DEFAULT_SYSTEM_PROMPT);

        let listed = archive.list_archives();
        assert_eq!(listed[0].month, created.format("%Y-%m").to_string());
    }

    #[test]
    fn test_plaintext_leftovers_counted_exactly() {
        let temp = TempDir::new().unwrap();
        let archive = ColdArchive::new(temp.path()).unwrap();

        // Simulates a run interrupted between plaintext write and compress.
        fs::write(temp.path().join("archive_2026-05.jsonl"), "a\nb\nc\n").unwrap();

        let listed = archive.list_archives();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].estimated);
        assert_eq!(listed[0].entries, 3);
    }

    #[test]
    fn test_export_combined_dataset() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();

        write_session_file(&sessions, Utc::now() - Duration::days(70), 3, true);
        write_session_file(&sessions, Utc::now() - Duration::days(40), 3, false);

        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();
        archive.archive_completed_months(&open_log(&sessions), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(archive.list_archives().len(), 2);

        let out = temp.path().join("combined.jsonl");
        let options = ExportOptions {
            success_only: true,
            max_entries: None,
            system_prompt: Some("export prompt".to_string()),
        };
        let written = archive.export_combined_dataset(&out, &options);
        assert_eq!(written, 3);

        for line in fs::read_to_string(&out).unwrap().lines() {
            let record: TrainingRecord = serde_json::from_str(line).unwrap();
            assert!(record.success);
            assert_eq!(record.messages[0].content, "export prompt");
        }
    }

    #[test]
    fn test_prune_archives_keeps_newest_months() {
        let temp = TempDir::new().unwrap();
        let sessions = temp.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();

        for days in [100, 70, 40] {
            write_session_file(&sessions, Utc::now() - Duration::days(days), 1, true);
        }

        let archive = ColdArchive::new(temp.path().join("archive")).unwrap();
        archive.archive_completed_months(&open_log(&sessions), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(archive.list_archives().len(), 3);

        let removed = archive.prune_archives(2);
        assert_eq!(removed, 1);

        let listed = archive.list_archives();
        assert_eq!(listed.len(), 2);
        // The oldest month is the one that was dropped.
        let months: Vec<&str> = listed.iter().map(|a| a.month.as_str()).collect();
        let oldest = (Utc::now() - Duration::days(100)).format("%Y-%m").to_string();
        assert!(!months.contains(&oldest.as_str()));
    }
}
