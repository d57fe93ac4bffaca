//! CraftMind: tiered experience memory for an autonomous game agent.
//!
//! Action outcomes flow through four tiers: a bounded in-memory buffer
//! for immediate recall, an append-only session log for durability, a
//! distilled pattern set scoring what reliably works, and a compressed
//! cold archive of training data. [`LearningSystem`] wires the tiers
//! together and is the only type most callers need.
//!
//! ```no_run
//! use craftmind::{LearningConfig, LearningSystem};
//!
//! # async fn demo() -> craftmind::Result<()> {
//! let system = LearningSystem::new(LearningConfig::default())?;
//! system.start().await;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod buffer;
pub mod config;
pub mod errors;
pub mod learning;
pub mod patterns;
pub mod session;
pub mod training;
pub mod types;

pub use archive::{ArchiveInfo, ColdArchive};
pub use buffer::ShortTermBuffer;
pub use config::{
    ArchiveConfig, BufferConfig, DistillerConfig, LearningConfig, SessionConfig,
};
pub use errors::{LearningError, Result};
pub use learning::{LearningStats, LearningSystem};
pub use patterns::{Pattern, PatternDistiller, Reliability, Trigger};
pub use session::{ExportOptions, SessionLog};
pub use training::{TrainingMessage, TrainingRecord, DEFAULT_SYSTEM_PROMPT};
pub use types::{
    compact_context, ActionContext, ActionOutcome, AgentAction, OutcomeRecord, Position,
    RawObservation, TimeOfDay,
};
