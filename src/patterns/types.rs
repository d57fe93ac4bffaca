//! Core data types for distilled behavioral patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActionContext, AgentAction, TimeOfDay};

/// Discrete trust label derived from confidence and sample size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    High,
    Medium,
    Low,
    Uncertain,
}

impl Reliability {
    pub fn label(&self) -> &'static str {
        match self {
            Reliability::High => "high",
            Reliability::Medium => "medium",
            Reliability::Low => "low",
            Reliability::Uncertain => "uncertain",
        }
    }
}

/// Coarse low/high band for health and food triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeBand {
    /// Clearly below 10 out of 20
    Low,
    /// Clearly above 15 out of 20
    High,
}

impl RangeBand {
    /// Whether a stat value falls inside this band
    pub fn matches(&self, value: f64) -> bool {
        match self {
            RangeBand::Low => value < 10.0,
            RangeBand::High => value > 15.0,
        }
    }
}

/// Conjunction of context conditions that co-occurred with a pattern's
/// action signature in at least 60% of its contributing records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underground: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<RangeBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food: Option<RangeBand>,
}

impl Trigger {
    /// Number of individual conditions in the conjunction
    pub fn condition_count(&self) -> usize {
        self.items.len()
            + self.blocks.len()
            + self.entities.len()
            + usize::from(self.time_of_day.is_some())
            + usize::from(self.underground.is_some())
            + usize::from(self.health.is_some())
            + usize::from(self.food.is_some())
    }

    /// Fraction of conditions satisfied by the given context.
    ///
    /// Returns 0.0 when the trigger has no conditions.
    pub fn match_score(&self, ctx: &ActionContext) -> f64 {
        let total = self.condition_count();
        if total == 0 {
            return 0.0;
        }

        let mut satisfied = 0;
        satisfied += self.items.iter().filter(|i| ctx.inventory.contains(i)).count();
        satisfied += self
            .blocks
            .iter()
            .filter(|b| ctx.nearby_blocks.contains(b))
            .count();
        satisfied += self
            .entities
            .iter()
            .filter(|e| ctx.nearby_entities.contains(e))
            .count();
        if self.time_of_day.is_some_and(|t| t == ctx.time_of_day) {
            satisfied += 1;
        }
        if self.underground.is_some_and(|u| u == ctx.underground) {
            satisfied += 1;
        }
        if self.health.is_some_and(|band| band.matches(ctx.health)) {
            satisfied += 1;
        }
        if self.food.is_some_and(|band| band.matches(ctx.food)) {
            satisfied += 1;
        }

        satisfied as f64 / total as f64
    }

    /// Short condition list for prompt text
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.items.is_empty() {
            parts.push(format!("carrying {}", self.items.join(", ")));
        }
        if !self.blocks.is_empty() {
            parts.push(format!("near {}", self.blocks.join(", ")));
        }
        if !self.entities.is_empty() {
            parts.push(format!("with {} nearby", self.entities.join(", ")));
        }
        if let Some(time) = self.time_of_day {
            parts.push(format!("during {}", time.label()));
        }
        match self.underground {
            Some(true) => parts.push("underground".to_string()),
            Some(false) => parts.push("on the surface".to_string()),
            None => {}
        }
        if let Some(band) = self.health {
            parts.push(match band {
                RangeBand::Low => "at low health".to_string(),
                RangeBand::High => "at high health".to_string(),
            });
        }
        if let Some(band) = self.food {
            parts.push(match band {
                RangeBand::Low => "when hungry".to_string(),
                RangeBand::High => "when well fed".to_string(),
            });
        }

        if parts.is_empty() {
            "in any situation".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Aggregate evidence behind a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub attempts: usize,
    pub successes: usize,
    pub avg_duration_ms: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

/// A confidence-scored behavioral rule distilled from outcome records
/// sharing an action signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub action: AgentAction,
    pub trigger: Trigger,
    pub stats: PatternStats,
    /// Wilson 95% lower bound on the success proportion, in [0, 1]
    pub confidence: f64,
    /// Confidence scaled by exponential recency decay
    pub decayed_score: f64,
    pub reliability: Reliability,
}

impl Pattern {
    /// Grouping key: `kind:target`
    pub fn signature(&self) -> String {
        self.action.signature()
    }

    /// One-line summary for prompt text
    pub fn describe(&self) -> String {
        format!(
            "{} {} succeeds ~{:.0}% of the time ({} attempts, {} reliability) {}",
            self.action.kind,
            self.action.target,
            self.confidence * 100.0,
            self.stats.attempts,
            self.reliability.label(),
            self.trigger.describe(),
        )
    }
}
