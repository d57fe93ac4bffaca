//! Short-Term Buffer: bounded in-process record of recent action outcomes.
//!
//! Answers fast queries (recent failures, stuck-loop detection) with no I/O.
//! Overflow past capacity is handed back to the caller so the coordinator
//! can append it to the durable session log before the records are dropped.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::errors::Result;
use crate::types::{truncate_chars, ActionContext, ActionOutcome, AgentAction, OutcomeRecord};

/// Maximum characters kept from a supplied reason
const MAX_REASON_CHARS: usize = 100;

/// Maximum characters kept from a supplied error message
const MAX_ERROR_CHARS: usize = 200;

/// Window inspected for stuck-loop detection
const STUCK_WINDOW: usize = 5;

/// Repetitions of one failed signature that count as a stuck loop
const STUCK_REPEATS: usize = 3;

/// Resume files older than this are discarded on load
const RESUME_MAX_AGE_SECS: i64 = 3600;

/// Version of the on-disk resume file
const RESUME_VERSION: u32 = 1;

/// One buffered record plus its delivery state
#[derive(Debug, Clone)]
struct BufferEntry {
    record: OutcomeRecord,
    /// Already delivered to the durable tier
    flushed: bool,
}

/// Single-slot session-resume file
#[derive(Debug, Serialize, Deserialize)]
struct ResumeFile {
    version: u32,
    session_id: String,
    start_time: DateTime<Utc>,
    last_flush: DateTime<Utc>,
    entries: Vec<OutcomeRecord>,
}

/// Bounded in-memory buffer of the most recent action outcomes
pub struct ShortTermBuffer {
    capacity: usize,
    entries: VecDeque<BufferEntry>,
    session_id: String,
    start_time: DateTime<Utc>,
    last_flush: DateTime<Utc>,
}

impl ShortTermBuffer {
    /// Create an empty buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
            session_id: Uuid::new_v4().to_string(),
            start_time: now,
            last_flush: now,
        }
    }

    /// Restore a buffer from the resume file at `path`, falling back to an
    /// empty buffer when the file is missing, stale, corrupt, or from a
    /// different version. Never fails.
    pub fn restore(path: &Path, capacity: usize) -> Self {
        match Self::try_restore(path, capacity) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => Self::new(capacity),
            Err(e) => {
                tracing::warn!(error = %e, "failed to restore buffer resume file, starting fresh");
                Self::new(capacity)
            }
        }
    }

    fn try_restore(path: &Path, capacity: usize) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path)?;
        let resume: ResumeFile = serde_json::from_str(&json)?;

        if resume.version != RESUME_VERSION {
            tracing::warn!(
                found = resume.version,
                expected = RESUME_VERSION,
                "resume file version mismatch, starting fresh"
            );
            return Ok(None);
        }

        let age = Utc::now() - resume.last_flush;
        if age > Duration::seconds(RESUME_MAX_AGE_SECS) {
            tracing::debug!("resume file older than one hour, discarding saved history");
            return Ok(None);
        }

        let capacity = capacity.max(1);
        let skip = resume.entries.len().saturating_sub(capacity);
        // Restored records were already persisted by the previous process.
        let entries = resume
            .entries
            .into_iter()
            .skip(skip)
            .map(|record| BufferEntry {
                record,
                flushed: true,
            })
            .collect();

        Ok(Some(Self {
            capacity,
            entries,
            session_id: resume.session_id,
            start_time: resume.start_time,
            last_flush: resume.last_flush,
        }))
    }

    /// Append an outcome record.
    ///
    /// Returns the oldest records evicted past capacity that were not yet
    /// delivered to the durable tier; the caller must append them to the
    /// session log before discarding.
    pub fn record(
        &mut self,
        action: AgentAction,
        context: ActionContext,
        success: bool,
        duration_ms: u64,
        reason: Option<&str>,
        error_msg: Option<&str>,
    ) -> Vec<OutcomeRecord> {
        let record = OutcomeRecord {
            timestamp: Utc::now(),
            context,
            action,
            outcome: ActionOutcome {
                success,
                message: error_msg
                    .map(|m| truncate_chars(m, MAX_ERROR_CHARS))
                    .unwrap_or_default(),
                duration_ms,
            },
            reason: reason.map(|r| truncate_chars(r, MAX_REASON_CHARS)),
        };

        self.entries.push_back(BufferEntry {
            record,
            flushed: false,
        });

        let mut overflow = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(entry) = self.entries.pop_front() {
                if !entry.flushed {
                    overflow.push(entry.record);
                }
            }
        }
        overflow
    }

    /// Most recent `n` records, newest first
    pub fn recent(&self, n: usize) -> Vec<&OutcomeRecord> {
        self.entries.iter().rev().take(n).map(|e| &e.record).collect()
    }

    /// Most recent `n` records for one action kind, newest first
    pub fn recent_for_kind(&self, kind: &str, n: usize) -> Vec<&OutcomeRecord> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.record.action.kind == kind)
            .take(n)
            .map(|e| &e.record)
            .collect()
    }

    /// Failures in a row, scanning backward from the newest record
    pub fn consecutive_failures(&self) -> usize {
        self.entries
            .iter()
            .rev()
            .take_while(|e| !e.record.outcome.success)
            .count()
    }

    /// True when the last three records are failures of the same signature
    pub fn is_repeating_failed_action(&self) -> bool {
        if self.entries.len() < STUCK_REPEATS {
            return false;
        }

        let mut last = self.entries.iter().rev().take(STUCK_REPEATS);
        let first = match last.next() {
            Some(e) if !e.record.outcome.success => e.record.signature(),
            _ => return false,
        };
        last.all(|e| !e.record.outcome.success && e.record.signature() == first)
    }

    /// Action kinds that failed at least `min_failures` times in the window
    pub fn failing_action_kinds(&self, min_failures: usize) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            if !entry.record.outcome.success {
                *counts.entry(entry.record.action.kind.as_str()).or_insert(0) += 1;
            }
        }

        let mut kinds: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_failures)
            .map(|(kind, _)| kind.to_string())
            .collect();
        kinds.sort();
        kinds
    }

    /// Kind of the newest failing record, if any
    pub fn most_recent_failing_kind(&self) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.record.outcome.success)
            .map(|e| e.record.action.kind.clone())
    }

    /// Human-readable warning when the most common failed signature among
    /// the last five records occurs three or more times
    pub fn stuck_loop_warning(&self) -> Option<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.entries.iter().rev().take(STUCK_WINDOW) {
            if !entry.record.outcome.success {
                *counts.entry(entry.record.signature()).or_insert(0) += 1;
            }
        }

        let (signature, count) = counts.into_iter().max_by_key(|(_, count)| *count)?;
        if count >= STUCK_REPEATS {
            Some(format!(
                "WARNING: '{}' has failed {} times in the last {} actions. Try a different approach.",
                signature, count, STUCK_WINDOW
            ))
        } else {
            None
        }
    }

    /// Take every record not yet delivered to the durable tier, marking
    /// them delivered
    pub fn take_unflushed(&mut self) -> Vec<OutcomeRecord> {
        let mut unflushed = Vec::new();
        for entry in self.entries.iter_mut() {
            if !entry.flushed {
                entry.flushed = true;
                unflushed.push(entry.record.clone());
            }
        }
        if !unflushed.is_empty() {
            self.last_flush = Utc::now();
        }
        unflushed
    }

    /// Records not yet delivered to the durable tier
    pub fn unflushed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.flushed).count()
    }

    /// Human-readable summary of the last `n` actions, oldest first
    pub fn activity_summary(&self, n: usize) -> String {
        if self.entries.is_empty() {
            return "No recent actions.".to_string();
        }

        let mut lines = vec!["Recent actions:".to_string()];
        let start = self.entries.len().saturating_sub(n);
        for entry in self.entries.iter().skip(start) {
            let record = &entry.record;
            let status = if record.outcome.success { "ok" } else { "FAILED" };
            let mut line = format!(
                "- [{}] {} {} ({}ms)",
                status, record.action.kind, record.action.target, record.outcome.duration_ms
            );
            if !record.outcome.success && !record.outcome.message.is_empty() {
                line.push_str(&format!(": {}", record.outcome.message));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Persist the full buffer to the single-slot resume file.
    ///
    /// Written to a temp file first, then renamed, so a crash mid-write
    /// never corrupts the previous slot.
    pub fn save_resume(&self, path: &Path) -> Result<()> {
        let resume = ResumeFile {
            version: RESUME_VERSION,
            session_id: self.session_id.clone(),
            start_time: self.start_time,
            last_flush: self.last_flush,
            entries: self.entries.iter().map(|e| e.record.clone()).collect(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(&resume)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Identifier of the current buffer session
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no records are buffered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
