//! Pattern Distiller: statistically validated behavioral rules.
//!
//! Periodically groups recent session records by action signature, scores
//! each group with a conservative Wilson lower bound, extracts the context
//! conditions that co-occurred with it, applies recency decay, and keeps a
//! bounded top-N set of patterns for recall at decision time.

pub mod stats;
pub mod store;
pub mod types;

pub use stats::{decay_factor, reliability, wilson_lower_bound, WILSON_Z};
pub use store::{PatternStore, PATTERN_FILE_VERSION};
pub use types::{Pattern, PatternStats, RangeBand, Reliability, Trigger};

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::DistillerConfig;
use crate::types::{ActionContext, OutcomeRecord};

/// Fraction of a group's records a context value must appear in to become
/// a trigger condition
const CO_OCCURRENCE_THRESHOLD: f64 = 0.6;

/// Cap on list-valued trigger conditions per category
const MAX_LIST_CONDITIONS: usize = 3;

/// Distills outcome records into a bounded set of live patterns
pub struct PatternDistiller {
    config: DistillerConfig,
    /// Live patterns keyed by action signature
    patterns: HashMap<String, Pattern>,
    store: PatternStore,
}

impl PatternDistiller {
    /// Create a distiller, loading any previously persisted patterns
    pub fn new(config: DistillerConfig, store_path: impl Into<PathBuf>) -> Self {
        let store = PatternStore::new(store_path);
        let patterns = store
            .load()
            .into_iter()
            .map(|p| (p.signature(), p))
            .collect();

        Self {
            config,
            patterns,
            store,
        }
    }

    /// Run one distillation cycle over recently loaded records.
    ///
    /// Qualifying signature groups replace their pattern wholesale; decay is
    /// then recomputed for every live pattern (idle patterns fade too), the
    /// set is pruned to the configured cap, and the result is persisted.
    /// Returns the number of patterns created or refreshed.
    pub fn distill(&mut self, records: &[OutcomeRecord]) -> usize {
        let now = Utc::now();

        let mut groups: HashMap<String, Vec<&OutcomeRecord>> = HashMap::new();
        for record in records {
            groups.entry(record.signature()).or_default().push(record);
        }

        let mut updated = 0;
        for (signature, group) in groups {
            if group.len() < self.config.min_attempts {
                continue;
            }

            let successes = group.iter().filter(|r| r.outcome.success).count();
            let confidence = wilson_lower_bound(successes, group.len());
            if confidence < self.config.min_confidence {
                continue;
            }

            let pattern = self.build_pattern(&signature, &group, successes, confidence);
            self.patterns.insert(signature, pattern);
            updated += 1;
        }

        for pattern in self.patterns.values_mut() {
            let age_ms = (now - pattern.stats.last_seen).num_milliseconds() as f64;
            pattern.decayed_score =
                pattern.confidence * decay_factor(age_ms, self.config.half_life_ms());
        }

        self.prune();
        self.persist();
        updated
    }

    /// Rebuild the pattern for one signature from its contributing records
    fn build_pattern(
        &self,
        signature: &str,
        group: &[&OutcomeRecord],
        successes: usize,
        confidence: f64,
    ) -> Pattern {
        let attempts = group.len();
        let total_duration: u64 = group.iter().map(|r| r.outcome.duration_ms).sum();
        let group_first = group.iter().map(|r| r.timestamp).min().unwrap_or_else(Utc::now);
        let last_seen = group.iter().map(|r| r.timestamp).max().unwrap_or_else(Utc::now);
        let last_success = group
            .iter()
            .filter(|r| r.outcome.success)
            .map(|r| r.timestamp)
            .max();

        // Identity and first sighting survive across cycles.
        let existing = self.patterns.get(signature);
        let id = existing.map(|p| p.id).unwrap_or_else(Uuid::new_v4);
        let first_seen = existing
            .map(|p| p.stats.first_seen.min(group_first))
            .unwrap_or(group_first);

        let age_ms = (Utc::now() - last_seen).num_milliseconds() as f64;

        Pattern {
            id,
            action: group[0].action.clone(),
            trigger: build_trigger(group),
            stats: PatternStats {
                attempts,
                successes,
                avg_duration_ms: total_duration as f64 / attempts as f64,
                first_seen,
                last_seen,
                last_success,
            },
            confidence,
            decayed_score: confidence * decay_factor(age_ms, self.config.half_life_ms()),
            reliability: reliability(confidence, attempts),
        }
    }

    /// Keep only the top `max_patterns` by decayed score
    fn prune(&mut self) {
        if self.patterns.len() <= self.config.max_patterns {
            return;
        }

        let mut ranked: Vec<(String, f64)> = self
            .patterns
            .iter()
            .map(|(sig, p)| (sig.clone(), p.decayed_score))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (signature, _) in ranked.into_iter().skip(self.config.max_patterns) {
            self.patterns.remove(&signature);
        }
    }

    /// Persist the live set; failures are logged, never raised
    pub fn persist(&self) -> bool {
        let mut patterns: Vec<Pattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| {
            b.decayed_score
                .partial_cmp(&a.decayed_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match self.store.save(&patterns, &self.config) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist patterns");
                false
            }
        }
    }

    /// Patterns relevant to the given context, best first.
    ///
    /// Ranked by `match_score x decayed_score`; zero-match patterns are
    /// excluded.
    pub fn relevant_patterns(&self, ctx: &ActionContext, limit: usize) -> Vec<Pattern> {
        let mut scored: Vec<(f64, &Pattern)> = self
            .patterns
            .values()
            .filter_map(|pattern| {
                let match_score = pattern.trigger.match_score(ctx);
                if match_score > 0.0 {
                    Some((match_score * pattern.decayed_score, pattern))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Prompt text describing the patterns relevant to the given context
    pub fn render_relevant(&self, ctx: &ActionContext, limit: usize) -> String {
        let relevant = self.relevant_patterns(ctx, limit);
        if relevant.is_empty() {
            return "No learned patterns match the current situation.".to_string();
        }

        let mut lines = vec!["What has worked before:".to_string()];
        for pattern in relevant {
            lines.push(format!("- {}", pattern.describe()));
        }
        lines.join("\n")
    }

    /// Pattern for one action signature, if live
    pub fn get(&self, signature: &str) -> Option<&Pattern> {
        self.patterns.get(signature)
    }

    /// Number of live patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns are live
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Distiller settings
    pub fn config(&self) -> &DistillerConfig {
        &self.config
    }
}

/// Extract the trigger conjunction from a signature group: values that
/// co-occur in at least 60% of records (top 3 by frequency for list
/// features), plus coarse health/food bands when the group average sits
/// clearly low or high.
fn build_trigger(group: &[&OutcomeRecord]) -> Trigger {
    let n = group.len();

    let items = frequent_values(group, n, |r| &r.context.inventory);
    let blocks = frequent_values(group, n, |r| &r.context.nearby_blocks);
    let entities = frequent_values(group, n, |r| &r.context.nearby_entities);

    let time_of_day = dominant_value(group, n, |r| r.context.time_of_day);
    let underground = dominant_value(group, n, |r| r.context.underground);

    let avg_health = group.iter().map(|r| r.context.health).sum::<f64>() / n as f64;
    let avg_food = group.iter().map(|r| r.context.food).sum::<f64>() / n as f64;

    Trigger {
        items,
        blocks,
        entities,
        time_of_day,
        underground,
        health: coarse_band(avg_health),
        food: coarse_band(avg_food),
    }
}

/// List values present in at least the co-occurrence share of records,
/// top `MAX_LIST_CONDITIONS` by frequency
fn frequent_values<'a>(
    group: &'a [&OutcomeRecord],
    n: usize,
    select: impl Fn(&'a OutcomeRecord) -> &'a Vec<String>,
) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in group {
        let mut seen: Vec<&str> = select(record).iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for value in seen {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    let threshold = CO_OCCURRENCE_THRESHOLD * n as f64;
    let mut frequent: Vec<(&str, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count as f64 >= threshold)
        .collect();
    // Frequency first, then name for a stable order.
    frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    frequent
        .into_iter()
        .take(MAX_LIST_CONDITIONS)
        .map(|(value, _)| value.to_string())
        .collect()
}

/// Scalar value shared by at least the co-occurrence share of records
fn dominant_value<T: Copy + PartialEq>(
    group: &[&OutcomeRecord],
    n: usize,
    select: impl Fn(&OutcomeRecord) -> T,
) -> Option<T> {
    let mut distinct: Vec<(T, usize)> = Vec::new();
    for record in group {
        let value = select(record);
        match distinct.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => distinct.push((value, 1)),
        }
    }

    let threshold = CO_OCCURRENCE_THRESHOLD * n as f64;
    distinct
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count as f64 >= threshold)
        .map(|(value, _)| value)
}

/// Coarse band only when the average sits clearly below 10 or above 15
fn coarse_band(average: f64) -> Option<RangeBand> {
    if average < 10.0 {
        Some(RangeBand::Low)
    } else if average > 15.0 {
        Some(RangeBand::High)
    } else {
        None
    }
}
