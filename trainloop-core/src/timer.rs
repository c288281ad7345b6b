//! Pausable wall-clock timer for measuring training time across resumes.

use crate::error::{Result, TrainLoopError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Serialized form of a [`Timer`]: only the accumulated time survives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    pub elapsed_secs: f64,
}

/// Timer that starts paused and accumulates time only while running.
///
/// Serializing a running timer captures its current reading; the
/// deserialized timer is paused at that value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "TimerState", from = "TimerState")]
pub struct Timer {
    accumulated_secs: f64,
    running_since: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paused timer with a pre-existing reading, e.g. from a checkpoint.
    pub fn with_elapsed(secs: f64) -> Result<Self> {
        let mut timer = Self::new();
        timer.add(secs)?;
        Ok(timer)
    }

    /// Start (or keep) measuring.
    pub fn run(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Stop measuring; the reading stays fixed until the next [`run`](Self::run).
    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_secs += since.elapsed().as_secs_f64();
        }
    }

    /// Paused copy holding the current reading.
    pub fn snapshot(&self) -> Self {
        Self::from(TimerState {
            elapsed_secs: self.elapsed(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Current reading in seconds.
    pub fn elapsed(&self) -> f64 {
        self.accumulated_secs
            + self
                .running_since
                .map(|since| since.elapsed().as_secs_f64())
                .unwrap_or(0.0)
    }

    /// Shift the reading forward.
    pub fn add(&mut self, secs: f64) -> Result<()> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(TrainLoopError::configuration(format!(
                "timer shift must be a non-negative finite number, got {secs}"
            )));
        }
        self.accumulated_secs += secs;
        Ok(())
    }

    /// Shift the reading backward, never below zero.
    pub fn sub(&mut self, secs: f64) -> Result<()> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(TrainLoopError::configuration(format!(
                "timer shift must be a non-negative finite number, got {secs}"
            )));
        }
        if secs > self.elapsed() {
            return Err(TrainLoopError::configuration(format!(
                "cannot subtract {secs}s from a reading of {:.3}s",
                self.elapsed()
            )));
        }
        self.accumulated_secs -= secs;
        Ok(())
    }

    /// Pause and zero the reading.
    pub fn reset(&mut self) {
        self.accumulated_secs = 0.0;
        self.running_since = None;
    }

    /// Run `f` with the timer running, pausing it afterwards.
    pub fn measure<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.run();
        let out = f();
        self.pause();
        out
    }

    /// Format the reading with a `strftime`-style pattern (`%H`, `%M`, `%S`, ...).
    ///
    /// Hours wrap at 24; use the `Display` impl for longer runs.
    pub fn format(&self, pattern: &str) -> String {
        let secs = (self.elapsed() as u64 % 86_400) as u32;
        chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
            .map(|t| t.format(pattern).to_string())
            .unwrap_or_default()
    }
}

/// `H:MM:SS`, with a `.ffffff` microsecond suffix when the reading is not a
/// whole second. Hours do not wrap.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = (self.elapsed() * 1e6).round() as u64;
        let total = micros / 1_000_000;
        write!(
            f,
            "{}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )?;
        match micros % 1_000_000 {
            0 => Ok(()),
            frac => write!(f, ".{frac:06}"),
        }
    }
}

impl From<Timer> for TimerState {
    fn from(timer: Timer) -> Self {
        Self {
            elapsed_secs: timer.elapsed(),
        }
    }
}

impl From<TimerState> for Timer {
    fn from(state: TimerState) -> Self {
        Self {
            accumulated_secs: state.elapsed_secs.max(0.0),
            running_since: None,
        }
    }
}
