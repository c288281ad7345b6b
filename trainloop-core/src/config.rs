//! Configuration for trackers, streams and training runs.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.

use crate::error::{Result, TrainLoopError};
use crate::tracker::Direction;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainLoopConfig {
    /// Early stopping settings.
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Stream settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Training loop settings.
    #[serde(default)]
    pub run: RunConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrainLoopConfig {
    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.patience == 0 {
            return Err(TrainLoopError::configuration(
                "tracker.patience must be a positive integer",
            ));
        }
        if !self.tracker.min_delta.is_finite() || self.tracker.min_delta < 0.0 {
            return Err(TrainLoopError::configuration(
                "tracker.min_delta must be a non-negative finite number",
            ));
        }
        if self.stream.epoch_size == Some(0) {
            return Err(TrainLoopError::configuration(
                "stream.epoch_size must be greater than zero",
            ));
        }
        if self.run.max_epochs == Some(0) {
            return Err(TrainLoopError::configuration(
                "run.max_epochs must be greater than zero",
            ));
        }
        if self.run.checkpoint_every == Some(0) {
            return Err(TrainLoopError::configuration(
                "run.checkpoint_every must be greater than zero",
            ));
        }
        if self.run.max_checkpoints == 0 {
            return Err(TrainLoopError::configuration(
                "run.max_checkpoints must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Early stopping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Consecutive non-improving observations tolerated before stopping.
    #[serde(default = "default_patience")]
    pub patience: u64,
    /// Whether higher (`max`) or lower (`min`) metric values are better.
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// Margin a value must beat the best by to count as an improvement.
    #[serde(default)]
    pub min_delta: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            patience: default_patience(),
            direction: default_direction(),
            min_delta: 0.0,
        }
    }
}

fn default_patience() -> u64 {
    5
}

fn default_direction() -> Direction {
    Direction::Min
}

/// Stream configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Fixed number of elements per epoch (unset: one full traversal per epoch).
    #[serde(default)]
    pub epoch_size: Option<u64>,
    /// Seed for shuffled sources.
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

/// Training loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on completed epochs (unset: stop only on early stopping).
    #[serde(default)]
    pub max_epochs: Option<u64>,
    /// Emit a run checkpoint every N epochs.
    #[serde(default)]
    pub checkpoint_every: Option<u64>,
    /// Checkpoint directory.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// How many checkpoints to keep per run.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_epochs: None,
            checkpoint_every: None,
            checkpoint_dir: default_checkpoint_dir(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".trainloop/checkpoints")
}

fn default_max_checkpoints() -> usize {
    3
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for the stderr layer.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily-rotated JSON logs (unset: no file logging).
    #[serde(default)]
    pub json_log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_log_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration with layered sources.
///
/// Order (later wins): defaults, the TOML file at `path` if it exists, then
/// `TRAINLOOP_`-prefixed environment variables with `__` as the section
/// separator (e.g. `TRAINLOOP_TRACKER__PATIENCE=10`).
pub fn load_config(path: Option<&Path>) -> Result<TrainLoopConfig> {
    let mut figment = Figment::from(Serialized::defaults(TrainLoopConfig::default()));

    if let Some(path) = path
        && path.exists()
    {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("TRAINLOOP_").split("__"));

    let config: TrainLoopConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
