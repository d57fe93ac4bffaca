//! Learning System: coordinator for the tiered memory pipeline.
//!
//! Owns the short-term buffer, session log, pattern distiller, and cold
//! archive; wires buffer overflow into the durable tier, runs the two
//! background timers, and exposes the unified surface the decision-maker
//! consumes. Every public method here is total: internal failures are
//! logged and absorbed, never raised into the decision loop.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::archive::{ArchiveInfo, ColdArchive};
use crate::buffer::ShortTermBuffer;
use crate::config::LearningConfig;
use crate::errors::Result;
use crate::patterns::{Pattern, PatternDistiller};
use crate::session::{ExportOptions, SessionLog};
use crate::training::DEFAULT_SYSTEM_PROMPT;
use crate::types::{ActionContext, AgentAction, OutcomeRecord};

/// Records pulled from the session log per distillation cycle
const DISTILL_SCAN_LIMIT: usize = 2000;

/// Recent actions rendered into the AI context
const ACTIVITY_LINES: usize = 10;

/// Patterns rendered into the AI context
const RELEVANT_PATTERN_LIMIT: usize = 5;

/// Cheap counters for the external dashboard boundary
#[derive(Debug, Clone)]
pub struct LearningStats {
    pub buffered_records: usize,
    pub unflushed_records: usize,
    pub live_patterns: usize,
    pub session_files: usize,
    pub records_recorded: usize,
    pub last_distillation: Option<DateTime<Utc>>,
}

/// Coordinator owning all four storage tiers.
///
/// Constructed once at process start and passed by reference to whatever
/// needs it; components are injected here rather than living as module
/// singletons.
pub struct LearningSystem {
    config: LearningConfig,
    buffer: Arc<RwLock<ShortTermBuffer>>,
    log: Arc<RwLock<SessionLog>>,
    distiller: Arc<RwLock<PatternDistiller>>,
    archive: Arc<ColdArchive>,
    resume_path: PathBuf,
    records_recorded: Arc<AtomicUsize>,
    last_distillation: Arc<RwLock<Option<DateTime<Utc>>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl LearningSystem {
    /// Build the full pipeline from one settings object.
    ///
    /// Creates the data directories, restores the buffer from its resume
    /// file, reopens the session log (reusing the newest file with spare
    /// capacity and applying retention), and loads persisted patterns.
    pub fn new(config: LearningConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let resume_path = config.resume_file();
        let buffer = ShortTermBuffer::restore(&resume_path, config.buffer.capacity);
        let log = SessionLog::new(config.session_dir(), &config.session)?;
        let distiller =
            PatternDistiller::new(config.distiller.clone(), config.pattern_file());
        let archive = ColdArchive::new(config.archive_dir())?;

        Ok(Self {
            config,
            buffer: Arc::new(RwLock::new(buffer)),
            log: Arc::new(RwLock::new(log)),
            distiller: Arc::new(RwLock::new(distiller)),
            archive: Arc::new(archive),
            resume_path,
            records_recorded: Arc::new(AtomicUsize::new(0)),
            last_distillation: Arc::new(RwLock::new(None)),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Create with default configuration
    pub fn default_config() -> Result<Self> {
        Self::new(LearningConfig::default())
    }

    /// Spawn the buffer flush/save timer and the distillation timer.
    /// Calling more than once is a no-op.
    pub async fn start(&self) {
        let mut timers = self.timers.lock().await;
        if !timers.is_empty() {
            return;
        }

        let flush_interval =
            std::time::Duration::from_secs(self.config.buffer.flush_interval_secs.max(1));
        let buffer = Arc::clone(&self.buffer);
        let log = Arc::clone(&self.log);
        let resume_path = self.resume_path.clone();
        timers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                flush_buffer(&buffer, &log, &resume_path).await;
            }
        }));

        let distill_interval =
            std::time::Duration::from_secs(self.config.distiller.interval_secs.max(1));
        let log = Arc::clone(&self.log);
        let distiller = Arc::clone(&self.distiller);
        let last_distillation = Arc::clone(&self.last_distillation);
        let retention_days = f64::from(self.config.session.retention_days);
        timers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(distill_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log.write().await.enforce_retention();
                run_distillation(&log, &distiller, &last_distillation, retention_days).await;
            }
        }));
    }

    /// Record one action outcome.
    ///
    /// Writes to the in-memory buffer synchronously; durability is deferred
    /// to the overflow hand-off and the flush timer. Never fails.
    pub async fn record_action(
        &self,
        action: AgentAction,
        context: ActionContext,
        success: bool,
        duration_ms: u64,
        reason: Option<&str>,
        error_msg: Option<&str>,
    ) {
        let overflow = self.buffer.write().await.record(
            action,
            context,
            success,
            duration_ms,
            reason,
            error_msg,
        );
        self.records_recorded.fetch_add(1, Ordering::Relaxed);

        if !overflow.is_empty() {
            if let Err(e) = self.log.write().await.append_entries(&overflow) {
                tracing::warn!(error = %e, "failed to append overflow to session log");
            }
        }
    }

    /// Failures in a row, newest backward
    pub async fn consecutive_failures(&self) -> usize {
        self.buffer.read().await.consecutive_failures()
    }

    /// Action kinds that failed at least `min_failures` times recently
    pub async fn failing_action_kinds(&self, min_failures: usize) -> Vec<String> {
        self.buffer.read().await.failing_action_kinds(min_failures)
    }

    /// Kind of the newest failing action, if any
    pub async fn most_recent_failing_kind(&self) -> Option<String> {
        self.buffer.read().await.most_recent_failing_kind()
    }

    /// Stuck-loop warning text, if the agent is repeating a failed action
    pub async fn stuck_loop_warning(&self) -> Option<String> {
        self.buffer.read().await.stuck_loop_warning()
    }

    /// Most recent `n` buffered records, newest first
    pub async fn recent_records(&self, n: usize) -> Vec<OutcomeRecord> {
        self.buffer
            .read()
            .await
            .recent(n)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Patterns relevant to the given context, best match first
    pub async fn relevant_patterns(&self, context: &ActionContext, limit: usize) -> Vec<Pattern> {
        self.distiller.read().await.relevant_patterns(context, limit)
    }

    /// Unified prompt context: recent activity, stuck-loop warning, and
    /// the learned patterns relevant to the current situation
    pub async fn build_context_for_ai(&self, context: &ActionContext) -> String {
        let mut sections = Vec::new();

        {
            let buffer = self.buffer.read().await;
            sections.push(buffer.activity_summary(ACTIVITY_LINES));
            if let Some(warning) = buffer.stuck_loop_warning() {
                sections.push(warning);
            }
        }

        sections.push(
            self.distiller
                .read()
                .await
                .render_relevant(context, RELEVANT_PATTERN_LIMIT),
        );

        sections.join("\n\n")
    }

    /// Run one distillation cycle immediately.
    ///
    /// Flushes the buffer first so the freshest records are visible to the
    /// distiller. Returns the number of patterns created or refreshed.
    pub async fn distill_now(&self) -> usize {
        flush_buffer(&self.buffer, &self.log, &self.resume_path).await;
        run_distillation(
            &self.log,
            &self.distiller,
            &self.last_distillation,
            f64::from(self.config.session.retention_days),
        )
        .await
    }

    /// Fold completed months of session data into the cold archive
    pub async fn archive_now(&self) -> Vec<(String, usize)> {
        let log = self.log.write().await;
        self.archive
            .archive_completed_months(&log, DEFAULT_SYSTEM_PROMPT)
    }

    /// Enumerate cold archive files
    pub fn list_archives(&self) -> Vec<ArchiveInfo> {
        self.archive.list_archives()
    }

    /// Export recent session data as one flat training file.
    /// Returns entries written, zero on failure.
    pub async fn export_session_dataset(
        &self,
        path: &std::path::Path,
        options: &ExportOptions,
    ) -> usize {
        match self.log.read().await.export_training_file(path, options) {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!(error = %e, "session dataset export failed");
                0
            }
        }
    }

    /// Export every archived month as one flat training file.
    /// Returns entries written, zero on failure.
    pub fn export_archive_dataset(
        &self,
        path: &std::path::Path,
        options: &ExportOptions,
    ) -> usize {
        self.archive.export_combined_dataset(path, options)
    }

    /// Apply the configured month-count pruning policy, if any
    pub fn prune_archives(&self) -> usize {
        match self.config.archive.max_months {
            Some(max_months) => self.archive.prune_archives(max_months),
            None => 0,
        }
    }

    /// Cheap counters for dashboards
    pub async fn stats(&self) -> LearningStats {
        let buffer = self.buffer.read().await;
        let log = self.log.read().await;
        LearningStats {
            buffered_records: buffer.len(),
            unflushed_records: buffer.unflushed_count(),
            live_patterns: self.distiller.read().await.len(),
            session_files: log.session_files().len(),
            records_recorded: self.records_recorded.load(Ordering::Relaxed),
            last_distillation: *self.last_distillation.read().await,
        }
    }

    /// Settings this system was built from
    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Clean stop: cancel timers, flush everything, run a final
    /// distillation, save the resume slot, and trigger one archive pass.
    /// Waits for outstanding I/O; nothing in memory is lost.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for timer in timers.drain(..) {
            timer.abort();
        }
        drop(timers);

        // Flush before distilling so the final batch contributes evidence.
        flush_buffer(&self.buffer, &self.log, &self.resume_path).await;
        run_distillation(
            &self.log,
            &self.distiller,
            &self.last_distillation,
            f64::from(self.config.session.retention_days),
        )
        .await;
        self.distiller.read().await.persist();
        self.archive_now().await;
    }
}

/// Deliver unflushed buffer records to the session log and save the
/// resume slot. Shared by the flush timer, `distill_now`, and `shutdown`.
async fn flush_buffer(
    buffer: &Arc<RwLock<ShortTermBuffer>>,
    log: &Arc<RwLock<SessionLog>>,
    resume_path: &std::path::Path,
) {
    let unflushed = buffer.write().await.take_unflushed();
    if !unflushed.is_empty() {
        if let Err(e) = log.write().await.append_entries(&unflushed) {
            tracing::warn!(error = %e, "failed to flush buffer to session log");
        }
    }

    if let Err(e) = buffer.read().await.save_resume(resume_path) {
        tracing::warn!(error = %e, "failed to save buffer resume file");
    }
}

/// One distillation cycle over recent session records
async fn run_distillation(
    log: &Arc<RwLock<SessionLog>>,
    distiller: &Arc<RwLock<PatternDistiller>>,
    last_distillation: &Arc<RwLock<Option<DateTime<Utc>>>>,
    retention_days: f64,
) -> usize {
    let records = log
        .read()
        .await
        .load_recent(DISTILL_SCAN_LIMIT, Some(retention_days));
    let updated = distiller.write().await.distill(&records);
    *last_distillation.write().await = Some(Utc::now());
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, TimeOfDay};
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> LearningConfig {
        let mut config = LearningConfig::with_data_dir(temp.path());
        config.buffer.capacity = 5;
        config
    }

    fn ctx() -> ActionContext {
        ActionContext {
            position: Position { x: 0.0, y: 64.0, z: 0.0 },
            health: 20.0,
            food: 20.0,
            inventory: vec!["wooden_axe".to_string()],
            nearby_blocks: vec!["oak_log".to_string()],
            nearby_entities: Vec::new(),
            time_of_day: TimeOfDay::Day,
            underground: false,
        }
    }

    async fn record_n(system: &LearningSystem, n: usize, success: bool) {
        for _ in 0..n {
            system
                .record_action(
                    AgentAction::new("mine", "oak_log"),
                    ctx(),
                    success,
                    100,
                    None,
                    None,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_record_and_stats() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        record_n(&system, 3, true).await;

        let stats = system.stats().await;
        assert_eq!(stats.buffered_records, 3);
        assert_eq!(stats.records_recorded, 3);
        assert_eq!(stats.unflushed_records, 3);
        assert_eq!(stats.live_patterns, 0);
    }

    #[tokio::test]
    async fn test_overflow_reaches_session_log() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        // Capacity 5: three records overflow into the durable tier.
        record_n(&system, 8, true).await;

        let stats = system.stats().await;
        assert_eq!(stats.buffered_records, 5);
        assert_eq!(stats.session_files, 1);

        let log = system.log.read().await;
        assert_eq!(log.load_recent(100, None).len(), 3);
    }

    #[tokio::test]
    async fn test_distill_now_builds_patterns_from_buffer() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        record_n(&system, 4, true).await;
        record_n(&system, 1, false).await;

        let updated = system.distill_now().await;
        assert_eq!(updated, 1);

        let patterns = system.relevant_patterns(&ctx(), 5).await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature(), "mine:oak_log");

        let stats = system.stats().await;
        assert_eq!(stats.unflushed_records, 0);
        assert!(stats.last_distillation.is_some());
    }

    #[tokio::test]
    async fn test_build_context_for_ai_sections() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        let text = system.build_context_for_ai(&ctx()).await;
        assert!(text.contains("No recent actions."));
        assert!(text.contains("No learned patterns"));

        record_n(&system, 4, true).await;
        for _ in 0..3 {
            system
                .record_action(
                    AgentAction::new("craft", "plank"),
                    ctx(),
                    false,
                    50,
                    None,
                    Some("no crafting table"),
                )
                .await;
        }

        let text = system.build_context_for_ai(&ctx()).await;
        assert!(text.contains("Recent actions:"));
        assert!(text.contains("craft:plank"));
        assert!(text.contains("WARNING"));
    }

    #[tokio::test]
    async fn test_failure_queries_pass_through() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        record_n(&system, 2, false).await;
        assert_eq!(system.consecutive_failures().await, 2);
        assert_eq!(
            system.most_recent_failing_kind().await,
            Some("mine".to_string())
        );
        assert_eq!(
            system.failing_action_kinds(2).await,
            vec!["mine".to_string()]
        );
    }

    #[tokio::test]
    async fn test_shutdown_loses_nothing() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let resume_path = config.resume_file();
        let system = LearningSystem::new(config.clone()).unwrap();
        system.start().await;

        record_n(&system, 4, true).await;
        record_n(&system, 1, false).await;
        system.shutdown().await;

        // All five records are durable, a pattern was distilled, and the
        // resume slot was saved.
        assert!(resume_path.exists());
        assert!(config.pattern_file().exists());

        let reopened = LearningSystem::new(config).unwrap();
        let stats = reopened.stats().await;
        assert_eq!(stats.buffered_records, 5);
        assert_eq!(stats.live_patterns, 1);

        let log = reopened.log.read().await;
        assert_eq!(log.load_recent(100, None).len(), 5);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let temp = TempDir::new().unwrap();
        let system = LearningSystem::new(test_config(&temp)).unwrap();

        system.start().await;
        system.start().await;
        assert_eq!(system.timers.lock().await.len(), 2);
        system.shutdown().await;
    }

    #[tokio::test]
    async fn test_prune_archives_respects_policy() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.archive.max_months = None;
        let system = LearningSystem::new(config).unwrap();

        // No policy configured: pruning is a no-op.
        assert_eq!(system.prune_archives(), 0);
    }
}
