//! Pattern persistence: one JSON file holding the full live pattern set.
//!
//! A version mismatch is treated as absent data, except for the known
//! version-1 legacy shape (patterns without ids), which gets a best-effort
//! id backfill before malformed entries are discarded.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use super::types::Pattern;
use crate::config::DistillerConfig;
use crate::errors::Result;

/// Current version of the pattern file
pub const PATTERN_FILE_VERSION: u32 = 2;

/// Legacy version whose entries lack the `id` field
const LEGACY_VERSION: u32 = 1;

#[derive(Serialize)]
struct PatternFile<'a> {
    version: u32,
    last_updated: chrono::DateTime<Utc>,
    config: &'a DistillerConfig,
    patterns: &'a [Pattern],
}

/// Durable storage slot for the live pattern set
pub struct PatternStore {
    path: PathBuf,
}

impl PatternStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load persisted patterns. Never fails: missing, corrupt, or
    /// incompatible files yield an empty set with a logged warning.
    pub fn load(&self) -> Vec<Pattern> {
        if !self.path.exists() {
            return Vec::new();
        }

        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read pattern file");
                return Vec::new();
            }
        };

        let value: Value = match serde_json::from_str(&json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "pattern file is not valid JSON");
                return Vec::new();
            }
        };

        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .map(|v| v as u32);

        match version {
            Some(PATTERN_FILE_VERSION) => Self::parse_entries(&value, false),
            Some(LEGACY_VERSION) => {
                tracing::warn!("legacy pattern file detected, backfilling pattern ids");
                Self::parse_entries(&value, true)
            }
            found => {
                tracing::warn!(
                    ?found,
                    expected = PATTERN_FILE_VERSION,
                    "pattern file version mismatch, starting fresh"
                );
                Vec::new()
            }
        }
    }

    fn parse_entries(value: &Value, backfill_ids: bool) -> Vec<Pattern> {
        let Some(entries) = value.get("patterns").and_then(Value::as_array) else {
            tracing::warn!("pattern file has no patterns array");
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let mut entry = entry.clone();
                if backfill_ids {
                    if let Some(obj) = entry.as_object_mut() {
                        obj.entry("id")
                            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                    }
                }
                match serde_json::from_value::<Pattern>(entry) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding malformed pattern entry");
                        None
                    }
                }
            })
            .collect()
    }

    /// Persist the full pattern set atomically (temp file, then rename)
    pub fn save(&self, patterns: &[Pattern], config: &DistillerConfig) -> Result<()> {
        let file = PatternFile {
            version: PATTERN_FILE_VERSION,
            last_updated: Utc::now(),
            config,
            patterns,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
