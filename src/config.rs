//! Configuration for the learning pipeline.
//!
//! One settings object covers every tier; all fields are optional in the
//! TOML file and fall back to the documented defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Short-term buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum records held in memory before overflow
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
    /// Seconds between flush/save timer ticks
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_buffer_capacity() -> usize {
    50
}

fn default_flush_interval_secs() -> u64 {
    30
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// Session log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Records per session file before rotation
    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,
    /// Whole files older than this are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_max_records_per_file() -> usize {
    1000
}

fn default_retention_days() -> u32 {
    7
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: default_max_records_per_file(),
            retention_days: default_retention_days(),
        }
    }
}

/// Pattern distiller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillerConfig {
    /// Minimum attempts before a signature group is distilled
    #[serde(default = "default_min_attempts")]
    pub min_attempts: usize,
    /// Minimum Wilson lower bound to keep a pattern
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Half-life of the recency decay, in days
    #[serde(default = "default_decay_half_life_days")]
    pub decay_half_life_days: f64,
    /// Cap on the live pattern set
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    /// Seconds between scheduled distillation cycles
    #[serde(default = "default_distill_interval_secs")]
    pub interval_secs: u64,
}

fn default_min_attempts() -> usize {
    5
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_decay_half_life_days() -> f64 {
    7.0
}

fn default_max_patterns() -> usize {
    200
}

fn default_distill_interval_secs() -> u64 {
    300
}

impl Default for DistillerConfig {
    fn default() -> Self {
        Self {
            min_attempts: default_min_attempts(),
            min_confidence: default_min_confidence(),
            decay_half_life_days: default_decay_half_life_days(),
            max_patterns: default_max_patterns(),
            interval_secs: default_distill_interval_secs(),
        }
    }
}

impl DistillerConfig {
    /// Decay half-life in milliseconds
    pub fn half_life_ms(&self) -> f64 {
        self.decay_half_life_days * 24.0 * 60.0 * 60.0 * 1000.0
    }
}

/// Cold archive settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Months of archives to keep when pruning is requested explicitly.
    /// `None` means archives are never pruned.
    #[serde(default)]
    pub max_months: Option<usize>,
}

/// Top-level settings object for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Base directory for all persisted state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub distiller: DistillerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".craftmind")
        .join("learning")
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            buffer: BufferConfig::default(),
            session: SessionConfig::default(),
            distiller: DistillerConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl LearningConfig {
    /// Default configuration rooted at the given data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file, falling back to defaults if
    /// the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).context("Failed to read config file")?;

        let config: LearningConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string).context("Failed to write config file")?;

        Ok(())
    }

    /// Directory holding session log files
    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Directory holding monthly archives
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    /// Path of the persisted pattern file
    pub fn pattern_file(&self) -> PathBuf {
        self.data_dir.join("patterns.json")
    }

    /// Path of the single-slot buffer resume file
    pub fn resume_file(&self) -> PathBuf {
        self.data_dir.join("session_resume.json")
    }
}
