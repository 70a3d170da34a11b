//! Analysis thresholds and batch settings, loaded from TOML.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Siphon search visits subsets of places, O(2^places).
pub const DEFAULT_SIPHON_MAX_PLACES: usize = 20;
pub const DEFAULT_TRAP_MAX_PLACES: usize = 20;
pub const DEFAULT_MAX_CYCLES: usize = 1_000;
pub const DEFAULT_MAX_STATES: usize = 10_000;
pub const DEFAULT_MAX_PATHS: usize = 5_000;
pub const DEFAULT_MAX_PATH_LENGTH: usize = 8;
/// Soft cap on intermediate rows of the Farkas tableau.
pub const DEFAULT_INVARIANT_MAX_ROWS: usize = 10_000;
pub const DEFAULT_HUB_DEGREE_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BATCH_RETRIES: u32 = 1;

/// Subset enumeration packs a place set into one `u64`.
pub const SUBSET_ENUMERATION_LIMIT: usize = 63;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} exceeds the subset enumeration limit of {limit} places")]
    SubsetLimit {
        field: &'static str,
        value: usize,
        limit: usize,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("hub_degree_multiplier must be a positive finite number, got {0}")]
    Multiplier(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_siphon_max_places")]
    pub siphon_max_places: usize,
    #[serde(default = "default_trap_max_places")]
    pub trap_max_places: usize,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    #[serde(default = "default_max_states")]
    pub max_states: usize,
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    #[serde(default = "default_invariant_max_rows")]
    pub invariant_max_rows: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            siphon_max_places: DEFAULT_SIPHON_MAX_PLACES,
            trap_max_places: DEFAULT_TRAP_MAX_PLACES,
            max_cycles: DEFAULT_MAX_CYCLES,
            max_states: DEFAULT_MAX_STATES,
            max_paths: DEFAULT_MAX_PATHS,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            invariant_max_rows: DEFAULT_INVARIANT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_retries")]
    pub retries: u32,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            retries: DEFAULT_BATCH_RETRIES,
            cache_dir: None,
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default = "default_hub_degree_multiplier")]
    pub hub_degree_multiplier: f64,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            hub_degree_multiplier: DEFAULT_HUB_DEGREE_MULTIPLIER,
            batch: BatchConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// A missing file yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AnalysisConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let guard = &self.guard;
        for (field, value) in [
            ("siphon_max_places", guard.siphon_max_places),
            ("trap_max_places", guard.trap_max_places),
        ] {
            if value > SUBSET_ENUMERATION_LIMIT {
                return Err(ConfigError::SubsetLimit {
                    field,
                    value,
                    limit: SUBSET_ENUMERATION_LIMIT,
                });
            }
        }
        for (field, value) in [
            ("max_cycles", guard.max_cycles),
            ("max_states", guard.max_states),
            ("max_paths", guard.max_paths),
            ("max_path_length", guard.max_path_length),
            ("invariant_max_rows", guard.invariant_max_rows),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }
        if !self.hub_degree_multiplier.is_finite() || self.hub_degree_multiplier <= 0.0 {
            return Err(ConfigError::Multiplier(self.hub_degree_multiplier));
        }
        Ok(())
    }
}

fn default_siphon_max_places() -> usize {
    DEFAULT_SIPHON_MAX_PLACES
}

fn default_trap_max_places() -> usize {
    DEFAULT_TRAP_MAX_PLACES
}

fn default_max_cycles() -> usize {
    DEFAULT_MAX_CYCLES
}

fn default_max_states() -> usize {
    DEFAULT_MAX_STATES
}

fn default_max_paths() -> usize {
    DEFAULT_MAX_PATHS
}

fn default_max_path_length() -> usize {
    DEFAULT_MAX_PATH_LENGTH
}

fn default_invariant_max_rows() -> usize {
    DEFAULT_INVARIANT_MAX_ROWS
}

fn default_hub_degree_multiplier() -> f64 {
    DEFAULT_HUB_DEGREE_MULTIPLIER
}

fn default_batch_timeout_secs() -> u64 {
    DEFAULT_BATCH_TIMEOUT_SECS
}

fn default_batch_retries() -> u32 {
    DEFAULT_BATCH_RETRIES
}
