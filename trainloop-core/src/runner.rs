//! Training loop facade — drives a [`Stream`] and a [`ProgressTracker`] together.
//!
//! The facade runs no model and computes no metric. Caller closures handle
//! each batch and produce the validation metric at every epoch boundary.

use crate::checkpoint::RunCheckpoint;
use crate::config::RunConfig;
use crate::error::{Result, TrainLoopError};
use crate::source::EpochSource;
use crate::stream::{Advance, Stream};
use crate::timer::Timer;
use crate::tracker::{Decision, ProgressTracker};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What the caller's epoch hook sees at a boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochContext {
    /// Index of the epoch that just finished (0-based).
    pub epoch: u64,
    /// Elements consumed in that epoch.
    pub iterations: u64,
    pub global_iteration: u64,
    /// Seconds spent in that epoch.
    pub epoch_secs: f64,
}

/// Why [`TrainingLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopped,
    MaxEpochs,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub epochs_completed: u64,
    pub global_iteration: u64,
    pub best_value: Option<f64>,
    pub elapsed_secs: f64,
}

/// Epoch loop glue with an optional epoch cap and checkpoint cadence.
#[derive(Debug, Clone, Default)]
pub struct TrainingLoop {
    max_epochs: Option<u64>,
    checkpoint_every: Option<u64>,
    timer: Timer,
}

impl TrainingLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let mut run = Self::new();
        if let Some(max) = config.max_epochs {
            run = run.with_max_epochs(max)?;
        }
        if let Some(every) = config.checkpoint_every {
            run = run.with_checkpoint_every(every)?;
        }
        Ok(run)
    }

    /// Stop after this many completed epochs (counted on the stream).
    pub fn with_max_epochs(mut self, max_epochs: u64) -> Result<Self> {
        if max_epochs == 0 {
            return Err(TrainLoopError::configuration(
                "max_epochs must be greater than zero",
            ));
        }
        self.max_epochs = Some(max_epochs);
        Ok(self)
    }

    /// Hand a [`RunCheckpoint`] to the checkpoint hook every `epochs` epochs.
    pub fn with_checkpoint_every(mut self, epochs: u64) -> Result<Self> {
        if epochs == 0 {
            return Err(TrainLoopError::configuration(
                "checkpoint_every must be greater than zero",
            ));
        }
        self.checkpoint_every = Some(epochs);
        Ok(self)
    }

    /// Continue timing from a restored reading.
    pub fn with_timer(mut self, timer: Timer) -> Self {
        self.timer = timer;
        self
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Run until the tracker says stop or the epoch cap is reached.
    ///
    /// `on_batch` receives every element. `on_epoch_end` returns the metric fed
    /// to the tracker. Errors from either hook abort the run.
    pub fn run<S, B, E>(
        &mut self,
        stream: &mut Stream<S>,
        tracker: &mut ProgressTracker,
        on_batch: B,
        on_epoch_end: E,
    ) -> Result<RunSummary>
    where
        S: EpochSource,
        B: FnMut(S::Item) -> anyhow::Result<()>,
        E: FnMut(&EpochContext) -> anyhow::Result<f64>,
    {
        self.run_with_checkpoints(stream, tracker, on_batch, on_epoch_end, |_| Ok(()))
    }

    /// Like [`run`](Self::run), also passing periodic checkpoints to `on_checkpoint`.
    ///
    /// A checkpoint is taken after the tracker has seen the epoch's metric, so
    /// restoring it resumes at the start of the next epoch.
    pub fn run_with_checkpoints<S, B, E, C>(
        &mut self,
        stream: &mut Stream<S>,
        tracker: &mut ProgressTracker,
        mut on_batch: B,
        mut on_epoch_end: E,
        mut on_checkpoint: C,
    ) -> Result<RunSummary>
    where
        S: EpochSource,
        B: FnMut(S::Item) -> anyhow::Result<()>,
        E: FnMut(&EpochContext) -> anyhow::Result<f64>,
        C: FnMut(RunCheckpoint) -> anyhow::Result<()>,
    {
        self.timer.run();
        let outcome = self.drive(
            stream,
            tracker,
            &mut on_batch,
            &mut on_epoch_end,
            &mut on_checkpoint,
        );
        self.timer.pause();
        let stop_reason = outcome?;

        let summary = RunSummary {
            stop_reason,
            epochs_completed: stream.current_epoch(),
            global_iteration: stream.global_iteration(),
            best_value: tracker.best_value(),
            elapsed_secs: self.timer.elapsed(),
        };
        info!(
            reason = ?summary.stop_reason,
            epochs = summary.epochs_completed,
            global_iteration = summary.global_iteration,
            best = ?summary.best_value,
            elapsed = %self.timer,
            "Training loop finished"
        );
        Ok(summary)
    }

    fn drive<S, B, E, C>(
        &self,
        stream: &mut Stream<S>,
        tracker: &mut ProgressTracker,
        on_batch: &mut B,
        on_epoch_end: &mut E,
        on_checkpoint: &mut C,
    ) -> Result<StopReason>
    where
        S: EpochSource,
        B: FnMut(S::Item) -> anyhow::Result<()>,
        E: FnMut(&EpochContext) -> anyhow::Result<f64>,
        C: FnMut(RunCheckpoint) -> anyhow::Result<()>,
    {
        if tracker.should_stop() {
            return Ok(StopReason::EarlyStopped);
        }
        if self.epoch_cap_reached(stream) {
            return Ok(StopReason::MaxEpochs);
        }

        let mut epoch_timer = Timer::new();
        epoch_timer.run();
        let mut iterations = stream.current_iteration_in_epoch();

        loop {
            match stream.advance()? {
                Advance::Element(item) => {
                    iterations += 1;
                    on_batch(item).map_err(TrainLoopError::Callback)?;
                }
                Advance::EndOfEpoch => {
                    epoch_timer.pause();
                    let ctx = EpochContext {
                        epoch: stream.current_epoch() - 1,
                        iterations,
                        global_iteration: stream.global_iteration(),
                        epoch_secs: epoch_timer.elapsed(),
                    };
                    let metric = on_epoch_end(&ctx).map_err(TrainLoopError::Callback)?;
                    let decision = tracker.observe(metric)?;
                    debug!(
                        epoch = ctx.epoch,
                        iterations = ctx.iterations,
                        metric,
                        ?decision,
                        "Epoch evaluated"
                    );

                    if let Some(every) = self.checkpoint_every
                        && stream.current_epoch() % every == 0
                    {
                        let checkpoint = RunCheckpoint::new(
                            stream.checkpoint(),
                            tracker.checkpoint(),
                            &self.timer,
                        )?;
                        on_checkpoint(checkpoint).map_err(TrainLoopError::Callback)?;
                    }

                    if decision == Decision::Stop {
                        return Ok(StopReason::EarlyStopped);
                    }
                    if self.epoch_cap_reached(stream) {
                        return Ok(StopReason::MaxEpochs);
                    }

                    iterations = 0;
                    epoch_timer.reset();
                    epoch_timer.run();
                }
            }
        }
    }

    fn epoch_cap_reached<S: EpochSource>(&self, stream: &Stream<S>) -> bool {
        self.max_epochs
            .is_some_and(|max| stream.current_epoch() >= max)
    }
}
