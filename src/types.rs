//! Core data types for the learning pipeline.
//!
//! Everything here is plain data: once constructed, a record is never
//! mutated, only copied forward between storage tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum inventory item names kept in a compact context
pub const MAX_INVENTORY_ITEMS: usize = 10;

/// Maximum nearby block names kept in a compact context
pub const MAX_NEARBY_BLOCKS: usize = 5;

/// Maximum nearby entity names kept in a compact context
pub const MAX_NEARBY_ENTITIES: usize = 5;

/// World position at decision time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Coarse time-of-day category derived from world ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Day,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Bucket a world-time tick (0..24000) into a category
    pub fn from_ticks(ticks: u32) -> Self {
        match ticks % 24_000 {
            0..=5_999 => TimeOfDay::Morning,
            6_000..=11_999 => TimeOfDay::Day,
            12_000..=13_799 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    /// Lowercase label used in rendered context text
    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Day => "day",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

/// Compact snapshot of world state at decision time.
///
/// Immutable once created; list fields are bounded by the `MAX_*` limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    pub position: Position,
    /// Health points, 0-20
    pub health: f64,
    /// Food points, 0-20
    pub food: f64,
    pub inventory: Vec<String>,
    pub nearby_blocks: Vec<String>,
    pub nearby_entities: Vec<String>,
    pub time_of_day: TimeOfDay,
    pub underground: bool,
}

/// The action the agent attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Action kind, e.g. "mine", "craft", "goto"
    pub kind: String,
    /// Action target, e.g. "oak_log"
    pub target: String,
}

impl AgentAction {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
        }
    }

    /// Grouping key for pattern distillation: `kind:target`
    pub fn signature(&self) -> String {
        format!("{}:{}", self.kind, self.target)
    }
}

/// Result of an attempted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// One recorded action attempt with its context and result.
///
/// The atomic unit flowing through every storage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub context: ActionContext,
    pub action: AgentAction,
    pub outcome: ActionOutcome,
    /// Short rationale supplied by the decision-maker
    pub reason: Option<String>,
}

impl OutcomeRecord {
    /// Action signature of this record
    pub fn signature(&self) -> String {
        self.action.signature()
    }
}

/// Raw world snapshot handed over by the decision-maker.
///
/// Unbounded lists and raw ticks; compacted by [`compact_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub position: Position,
    pub health: f64,
    pub food: f64,
    pub inventory: Vec<String>,
    pub nearby_blocks: Vec<String>,
    pub nearby_entities: Vec<String>,
    /// World time in ticks (0..24000)
    pub time_ticks: u32,
    pub underground: bool,
}

/// Build a compact context from a raw observation.
///
/// Pure function, no I/O: truncates list features to their limits and
/// buckets the world tick into a time-of-day category.
pub fn compact_context(raw: &RawObservation) -> ActionContext {
    ActionContext {
        position: raw.position,
        health: raw.health,
        food: raw.food,
        inventory: raw.inventory.iter().take(MAX_INVENTORY_ITEMS).cloned().collect(),
        nearby_blocks: raw.nearby_blocks.iter().take(MAX_NEARBY_BLOCKS).cloned().collect(),
        nearby_entities: raw
            .nearby_entities
            .iter()
            .take(MAX_NEARBY_ENTITIES)
            .cloned()
            .collect(),
        time_of_day: TimeOfDay::from_ticks(raw.time_ticks),
        underground: raw.underground,
    }
}

/// Truncate a string to at most `max` characters
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
