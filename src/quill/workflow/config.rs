// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Settings are read from YAML, then overridden by `QUILL_*` environment
//! variables, then validated. The resulting `EngineConfig` is handed to the
//! orchestrator explicitly; nothing here is process-global.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::adk::error::{ConfigError, QuillError};
use crate::adk::review::ReviewPolicy;

/// Top-level engine settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Iteration cap used when a run does not specify one
    pub max_iterations: u32,
    /// Per agent call timeout
    pub agent_timeout_secs: u64,
    pub phase: PhaseConfig,
    pub cycle: CycleConfig,
    pub review: ReviewConfig,
}

/// Progress weights and routing thresholds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PhaseConfig {
    /// Characters that make a chapter draft complete
    pub chapter_target_length: usize,
    /// Draft length above which a chapter counts as in progress
    pub chapter_in_progress_threshold: usize,
    /// World detail entries below which the world is considered sparse
    pub min_world_details: usize,
    /// Characters required before macro planning is complete
    pub macro_min_characters: usize,
    pub outline_weight: f64,
    pub world_weight: f64,
    pub characters_weight: f64,
    pub story_arc_weight: f64,
}

/// How a detected cycle picks the phase to force
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForcedTransitionStrategy {
    /// macro -> mid, mid -> micro, micro -> mid
    #[default]
    TowardMicro,
    /// Adjacent phase with the lowest progress
    LeastProgress,
}

/// Cycle guard settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    /// Ring buffer size
    pub window: usize,
    pub min_period: usize,
    pub max_period: usize,
    pub strategy: ForcedTransitionStrategy,
}

/// Human review checkpoint settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Request review after every committed chapter
    pub enabled: bool,
    /// Decision used when no reviewer is attached
    pub policy: ReviewPolicy,
    /// How long a review may take before `policy` decides
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            agent_timeout_secs: 120,
            phase: PhaseConfig::default(),
            cycle: CycleConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            chapter_target_length: 5000,
            chapter_in_progress_threshold: 50,
            min_world_details: 3,
            macro_min_characters: 2,
            outline_weight: 0.3,
            world_weight: 0.2,
            characters_weight: 0.2,
            story_arc_weight: 0.3,
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            window: 8,
            min_period: 2,
            max_period: 4,
            strategy: ForcedTransitionStrategy::TowardMicro,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: ReviewPolicy::Fail,
            timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Check that every setting is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("max_iterations", "must be positive"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(ConfigError::invalid("agent_timeout_secs", "must be positive"));
        }
        if self.review.timeout_secs == 0 {
            return Err(ConfigError::invalid("review.timeout_secs", "must be positive"));
        }
        if self.phase.chapter_target_length == 0 {
            return Err(ConfigError::invalid(
                "phase.chapter_target_length",
                "must be positive",
            ));
        }
        let weights = [
            ("phase.outline_weight", self.phase.outline_weight),
            ("phase.world_weight", self.phase.world_weight),
            ("phase.characters_weight", self.phase.characters_weight),
            ("phase.story_arc_weight", self.phase.story_arc_weight),
        ];
        for (key, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }
        if self.cycle.min_period == 0 || self.cycle.max_period < self.cycle.min_period {
            return Err(ConfigError::invalid(
                "cycle.max_period",
                format!(
                    "period range {}..={} is empty",
                    self.cycle.min_period, self.cycle.max_period
                ),
            ));
        }
        if self.cycle.window < self.cycle.max_period * 2 {
            return Err(ConfigError::invalid(
                "cycle.window",
                format!(
                    "must hold two repetitions of the longest period ({})",
                    self.cycle.max_period * 2
                ),
            ));
        }
        Ok(())
    }

    /// Apply overrides from a key lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUILL_MAX_ITERATIONS") {
            self.max_iterations = parse_var("QUILL_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("QUILL_AGENT_TIMEOUT_SECS") {
            self.agent_timeout_secs = parse_var("QUILL_AGENT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("QUILL_CHAPTER_TARGET_LENGTH") {
            self.phase.chapter_target_length = parse_var("QUILL_CHAPTER_TARGET_LENGTH", &v)?;
        }
        if let Some(v) = lookup("QUILL_CYCLE_WINDOW") {
            self.cycle.window = parse_var("QUILL_CYCLE_WINDOW", &v)?;
        }
        if let Some(v) = lookup("QUILL_REVIEW_ENABLED") {
            self.review.enabled = parse_var("QUILL_REVIEW_ENABLED", &v)?;
        }
        if let Some(v) = lookup("QUILL_REVIEW_POLICY") {
            self.review.policy = match v.trim().to_lowercase().as_str() {
                "approve" => ReviewPolicy::Approve,
                "reject" => ReviewPolicy::Reject,
                "fail" => ReviewPolicy::Fail,
                other => {
                    return Err(ConfigError::invalid(
                        "QUILL_REVIEW_POLICY",
                        format!("unknown policy '{}'", other),
                    ))
                }
            };
        }
        Ok(())
    }

    /// Apply `QUILL_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", value)))
}

/// Loads engine configuration from YAML files
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load, apply environment overrides and validate
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<EngineConfig, QuillError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::parse_yaml(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from a YAML string
    pub fn parse_yaml(content: &str) -> Result<EngineConfig, QuillError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
