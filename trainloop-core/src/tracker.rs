//! Progress tracker — early stopping over a sequence of metric observations.

use crate::config::TrackerConfig;
use crate::error::{Result, TrainLoopError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Max,
    Min,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TrainLoopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(TrainLoopError::configuration(format!(
                "unknown improvement direction '{other}', expected 'max' or 'min'"
            ))),
        }
    }
}

/// Result of a single [`ProgressTracker::observe`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Improved,
    NoImprovement,
    Stop,
}

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    NoObservations,
    Tracking,
    Stopped,
}

/// Serializable snapshot of a [`ProgressTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub best_value: Option<f64>,
    pub direction: Direction,
    pub patience: u64,
    #[serde(default)]
    pub min_delta: f64,
    pub strikes: u64,
    /// Observations seen so far. When absent the count is inferred as the
    /// smallest one consistent with `best_value` and `strikes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<u64>,
}

/// Early-stopping state machine.
///
/// An observation improves only if it beats the best value by more than
/// `min_delta` in the configured direction, so a value equal to the best is a
/// strike. Once `strikes` reaches `patience` the tracker is stopped for good:
/// further observations are ignored and answered with [`Decision::Stop`].
/// Starting over means building a new tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressTracker {
    direction: Direction,
    patience: u64,
    min_delta: f64,
    best_value: Option<f64>,
    strikes: u64,
    observations: u64,
}

impl ProgressTracker {
    pub fn new(patience: u64, direction: Direction) -> Result<Self> {
        Self::with_min_delta(patience, direction, 0.0)
    }

    pub fn with_min_delta(patience: u64, direction: Direction, min_delta: f64) -> Result<Self> {
        validate_settings(patience, min_delta)?;
        Ok(Self {
            direction,
            patience,
            min_delta,
            best_value: None,
            strikes: 0,
            observations: 0,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::with_min_delta(config.patience, config.direction, config.min_delta)
    }

    /// Record a metric value and decide whether training should go on.
    pub fn observe(&mut self, value: f64) -> Result<Decision> {
        if value.is_nan() {
            return Err(TrainLoopError::invalid_metric("metric value is NaN"));
        }
        if self.should_stop() {
            return Ok(Decision::Stop);
        }

        self.observations += 1;
        if self.improves_on_best(value) {
            self.best_value = Some(value);
            self.strikes = 0;
            debug!(value, observations = self.observations, "Metric improved");
            return Ok(Decision::Improved);
        }

        self.strikes += 1;
        if self.should_stop() {
            info!(
                best = ?self.best_value,
                strikes = self.strikes,
                patience = self.patience,
                "Early stopping triggered"
            );
            Ok(Decision::Stop)
        } else {
            debug!(
                value,
                strikes = self.strikes,
                patience = self.patience,
                "No improvement"
            );
            Ok(Decision::NoImprovement)
        }
    }

    fn improves_on_best(&self, value: f64) -> bool {
        match (self.best_value, self.direction) {
            (None, _) => true,
            (Some(best), Direction::Max) => value > best + self.min_delta,
            (Some(best), Direction::Min) => value < best - self.min_delta,
        }
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn strikes(&self) -> u64 {
        self.strikes
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn patience(&self) -> u64 {
        self.patience
    }

    pub fn min_delta(&self) -> f64 {
        self.min_delta
    }

    pub fn should_stop(&self) -> bool {
        self.strikes >= self.patience
    }

    pub fn phase(&self) -> TrackerPhase {
        if self.should_stop() {
            TrackerPhase::Stopped
        } else if self.observations == 0 {
            TrackerPhase::NoObservations
        } else {
            TrackerPhase::Tracking
        }
    }

    pub fn checkpoint(&self) -> TrackerState {
        TrackerState {
            best_value: self.best_value,
            direction: self.direction,
            patience: self.patience,
            min_delta: self.min_delta,
            strikes: self.strikes,
            observations: Some(self.observations),
        }
    }

    /// Rebuild a tracker from a snapshot, rejecting inconsistent state.
    pub fn restore(state: TrackerState) -> Result<Self> {
        validate_settings(state.patience, state.min_delta)
            .map_err(|e| TrainLoopError::invalid_checkpoint(e.to_string()))?;

        if state.strikes > state.patience {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "strikes {} exceed patience {}",
                state.strikes, state.patience
            )));
        }
        match state.best_value {
            Some(best) if best.is_nan() => {
                return Err(TrainLoopError::invalid_checkpoint("best_value is NaN"));
            }
            Some(_) if state.observations == Some(0) => {
                return Err(TrainLoopError::invalid_checkpoint(
                    "best_value set without any observations",
                ));
            }
            None if state.observations.is_some_and(|n| n > 0) || state.strikes > 0 => {
                return Err(TrainLoopError::invalid_checkpoint(
                    "observations recorded without a best_value",
                ));
            }
            _ => {}
        }
        // The first observation always improves, so at most observations - 1 strikes.
        let observations = match (state.observations, state.best_value) {
            (Some(n), _) => {
                if n > 0 && state.strikes >= n {
                    return Err(TrainLoopError::invalid_checkpoint(format!(
                        "strikes {} not possible after {n} observations",
                        state.strikes
                    )));
                }
                n
            }
            (None, Some(_)) => state.strikes + 1,
            (None, None) => 0,
        };

        Ok(Self {
            direction: state.direction,
            patience: state.patience,
            min_delta: state.min_delta,
            best_value: state.best_value,
            strikes: state.strikes,
            observations,
        })
    }
}

fn validate_settings(patience: u64, min_delta: f64) -> Result<()> {
    if patience == 0 {
        return Err(TrainLoopError::configuration(
            "patience must be a positive integer",
        ));
    }
    if !min_delta.is_finite() || min_delta < 0.0 {
        return Err(TrainLoopError::configuration(format!(
            "min_delta must be a non-negative finite number, got {min_delta}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(tracker: &mut ProgressTracker, values: &[f64]) -> Vec<Decision> {
        values.iter().map(|&v| tracker.observe(v).unwrap()).collect()
    }

    #[test]
    fn test_maximize_patience_three() {
        let mut tracker = ProgressTracker::new(3, Direction::Max).unwrap();
        assert_eq!(
            run(&mut tracker, &[1.0, 0.9, 0.9, 0.9]),
            vec![
                Decision::Improved,
                Decision::NoImprovement,
                Decision::NoImprovement,
                Decision::Stop,
            ]
        );
        assert_eq!(tracker.strikes(), 3);
        assert_eq!(tracker.best_value(), Some(1.0));
        assert_eq!(tracker.phase(), TrackerPhase::Stopped);
    }

    #[test]
    fn test_ties_are_strikes() {
        for direction in [Direction::Max, Direction::Min] {
            let mut tracker = ProgressTracker::new(5, direction).unwrap();
            tracker.observe(2.0).unwrap();
            assert_eq!(tracker.observe(2.0).unwrap(), Decision::NoImprovement);
            assert_eq!(tracker.strikes(), 1);
        }
    }

    #[test]
    fn test_improvement_resets_strikes() {
        for (direction, sign) in [(Direction::Max, 1.0), (Direction::Min, -1.0)] {
            let mut tracker = ProgressTracker::new(2, direction).unwrap();
            assert_eq!(
                run(&mut tracker, &[0.0, 0.0, sign * 1.0, sign * 1.0]),
                vec![
                    Decision::Improved,
                    Decision::NoImprovement,
                    Decision::Improved,
                    Decision::NoImprovement,
                ]
            );
            assert_eq!(tracker.observe(sign * 0.5).unwrap(), Decision::Stop);
            assert_eq!(tracker.best_value(), Some(sign * 1.0));
        }
    }

    #[test]
    fn test_min_delta() {
        for (direction, sign) in [(Direction::Max, 1.0), (Direction::Min, -1.0)] {
            let mut tracker = ProgressTracker::with_min_delta(1, direction, 0.1).unwrap();
            assert_eq!(tracker.observe(0.0).unwrap(), Decision::Improved);
            assert_eq!(tracker.observe(sign * 0.2).unwrap(), Decision::Improved);
            assert_eq!(tracker.observe(sign * 0.299).unwrap(), Decision::Stop);
        }
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut tracker = ProgressTracker::new(1, Direction::Min).unwrap();
        tracker.observe(1.0).unwrap();
        assert_eq!(tracker.observe(1.0).unwrap(), Decision::Stop);
        assert_eq!(tracker.observe(-100.0).unwrap(), Decision::Stop);
        assert_eq!(tracker.best_value(), Some(1.0));
        assert_eq!(tracker.strikes(), 1);
        assert_eq!(tracker.observations(), 2);
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            ProgressTracker::new(0, Direction::Max),
            Err(TrainLoopError::Configuration(_))
        ));
        assert!(ProgressTracker::with_min_delta(1, Direction::Min, -1.0).is_err());
        assert!(ProgressTracker::with_min_delta(1, Direction::Min, f64::INFINITY).is_err());
        assert!(matches!(
            "hello".parse::<Direction>(),
            Err(TrainLoopError::Configuration(_))
        ));
        assert_eq!("min".parse::<Direction>().unwrap(), Direction::Min);
    }

    #[test]
    fn test_nan_rejected_without_state_change() {
        let mut tracker = ProgressTracker::new(2, Direction::Max).unwrap();
        tracker.observe(1.0).unwrap();
        assert!(matches!(
            tracker.observe(f64::NAN),
            Err(TrainLoopError::InvalidMetric(_))
        ));
        assert_eq!(tracker.observations(), 1);
        assert_eq!(tracker.strikes(), 0);
    }

    #[test]
    fn test_phase_transitions() {
        let mut tracker = ProgressTracker::new(1, Direction::Max).unwrap();
        assert_eq!(tracker.phase(), TrackerPhase::NoObservations);
        tracker.observe(0.3).unwrap();
        assert_eq!(tracker.phase(), TrackerPhase::Tracking);
        tracker.observe(0.1).unwrap();
        assert_eq!(tracker.phase(), TrackerPhase::Stopped);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut tracker = ProgressTracker::with_min_delta(4, Direction::Min, 0.01).unwrap();
        run(&mut tracker, &[0.9, 0.5, 0.7, 0.6]);
        let restored = ProgressTracker::restore(tracker.checkpoint()).unwrap();
        assert_eq!(restored, tracker);
        assert_eq!(restored.strikes(), 2);
    }

    #[test]
    fn test_untouched_checkpoint_round_trip() {
        let tracker = ProgressTracker::new(3, Direction::Max).unwrap();
        let restored = ProgressTracker::restore(tracker.checkpoint()).unwrap();
        assert_eq!(restored.best_value(), None);
        assert_eq!(restored.strikes(), 0);
        assert_eq!(restored.phase(), TrackerPhase::NoObservations);
    }

    #[test]
    fn test_state_json_layout() {
        let mut tracker = ProgressTracker::new(3, Direction::Max).unwrap();
        tracker.observe(0.25).unwrap();
        let json = serde_json::to_value(tracker.checkpoint()).unwrap();
        assert_eq!(json["direction"], "max");
        assert_eq!(json["best_value"], 0.25);
        assert_eq!(json["patience"], 3);
        assert_eq!(json["strikes"], 0);
    }

    #[test]
    fn test_restore_without_observation_count() {
        let state: TrackerState = serde_json::from_str(
            r#"{"best_value":1.0,"direction":"max","patience":3,"strikes":1}"#,
        )
        .unwrap();
        assert_eq!(state.observations, None);
        assert_eq!(state.min_delta, 0.0);

        let mut tracker = ProgressTracker::restore(state).unwrap();
        assert_eq!(tracker.best_value(), Some(1.0));
        assert_eq!(tracker.strikes(), 1);
        assert_eq!(tracker.observations(), 2);
        assert_eq!(tracker.phase(), TrackerPhase::Tracking);
        assert_eq!(tracker.observe(0.5).unwrap(), Decision::NoImprovement);
        assert_eq!(tracker.observe(1.0).unwrap(), Decision::Stop);

        let fresh: TrackerState =
            serde_json::from_str(r#"{"best_value":null,"direction":"min","patience":2,"strikes":0}"#)
                .unwrap();
        let tracker = ProgressTracker::restore(fresh).unwrap();
        assert_eq!(tracker.phase(), TrackerPhase::NoObservations);

        let orphan: TrackerState =
            serde_json::from_str(r#"{"best_value":null,"direction":"min","patience":2,"strikes":1}"#)
                .unwrap();
        assert!(ProgressTracker::restore(orphan).is_err());
    }

    #[test]
    fn test_restore_rejects_inconsistent_state() {
        let base = TrackerState {
            best_value: Some(1.0),
            direction: Direction::Max,
            patience: 3,
            min_delta: 0.0,
            strikes: 1,
            observations: Some(2),
        };
        assert!(ProgressTracker::restore(base.clone()).is_ok());

        let cases = [
            TrackerState {
                patience: 0,
                ..base.clone()
            },
            TrackerState {
                strikes: 4,
                observations: Some(9),
                ..base.clone()
            },
            TrackerState {
                best_value: None,
                ..base.clone()
            },
            TrackerState {
                observations: Some(0),
                strikes: 0,
                ..base.clone()
            },
            TrackerState {
                strikes: 2,
                ..base.clone()
            },
        ];
        for state in cases {
            assert!(matches!(
                ProgressTracker::restore(state),
                Err(TrainLoopError::InvalidCheckpoint(_))
            ));
        }
    }
}
