//! Resumable stream — epoch/iteration accounting over an [`EpochSource`].
//!
//! The stream owns its source and is the unit that gets checkpointed. It
//! reports epoch boundaries as a value ([`Advance::EndOfEpoch`]) so callers can
//! run per-epoch bookkeeping before the next epoch's first element is pulled.
//!
//! # Resume policy
//!
//! Most sources cannot be rewound to an arbitrary offset. On
//! [`restore`](Stream::restore) the stream restarts the recorded traversal and
//! then either seeks directly (when [`EpochSource::is_seekable`]) or replays
//! and discards elements until the recorded position is reached. Replay is
//! only exact when the source produces the same sequence for the same
//! traversal index; a source that reshuffles from an untracked RNG will resume
//! with correct counters but a different element order.

use crate::config::StreamConfig;
use crate::error::{Result, TrainLoopError};
use crate::source::EpochSource;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of [`Stream::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance<T> {
    /// The next element of the current epoch.
    Element(T),
    /// The previous epoch just ended; the counters already point at the new one.
    EndOfEpoch,
}

impl<T> Advance<T> {
    pub fn is_end_of_epoch(&self) -> bool {
        matches!(self, Self::EndOfEpoch)
    }

    pub fn into_element(self) -> Option<T> {
        match self {
            Self::Element(item) => Some(item),
            Self::EndOfEpoch => None,
        }
    }
}

/// Serializable snapshot of a [`Stream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub epoch: u64,
    pub iteration_in_epoch: u64,
    pub global_iteration: u64,
    /// Source-specific token, opaque to the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<serde_json::Value>,
    /// Fixed epoch size the stream was running with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_size: Option<u64>,
    /// Index of the live source traversal. Equals `epoch` without a fixed
    /// epoch size; when absent it is taken from the epoch counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_traversal: Option<u64>,
    /// Elements consumed from the live traversal. When absent it is taken
    /// from `iteration_in_epoch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_position: Option<u64>,
}

/// Epoch/iteration counter wrapped around a restartable source.
pub struct Stream<S: EpochSource> {
    source: S,
    epoch: u64,
    iteration_in_epoch: u64,
    global_iteration: u64,
    epoch_size: Option<u64>,
    traversal: u64,
    traversal_position: u64,
    armed: bool,
    boundary_pending: bool,
}

impl<S: EpochSource> Stream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            epoch: 0,
            iteration_in_epoch: 0,
            global_iteration: 0,
            epoch_size: None,
            traversal: 0,
            traversal_position: 0,
            armed: false,
            boundary_pending: false,
        }
    }

    /// Use epochs of exactly `size` elements regardless of the source length.
    ///
    /// The live traversal carries over epoch boundaries and is restarted only
    /// when it runs dry, which makes infinite sources usable. A source that
    /// yields nothing at all still produces [`Advance::EndOfEpoch`].
    pub fn with_epoch_size(mut self, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(TrainLoopError::configuration(
                "epoch_size must be greater than zero",
            ));
        }
        self.epoch_size = Some(size);
        Ok(self)
    }

    /// Build a stream with the settings from a [`StreamConfig`].
    pub fn from_config(source: S, config: &StreamConfig) -> Result<Self> {
        let stream = Self::new(source);
        match config.epoch_size {
            Some(size) => stream.with_epoch_size(size),
            None => Ok(stream),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current_iteration_in_epoch(&self) -> u64 {
        self.iteration_in_epoch
    }

    pub fn global_iteration(&self) -> u64 {
        self.global_iteration
    }

    pub fn epoch_size(&self) -> Option<u64> {
        self.epoch_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Request the next element, or the boundary signal if the epoch is over.
    ///
    /// After an [`Advance::EndOfEpoch`] the next call starts the new epoch.
    /// The source is re-armed lazily on that call, so a failing factory is
    /// reported by the call that actually needs an element.
    pub fn advance(&mut self) -> Result<Advance<S::Item>> {
        match self.pull()? {
            Some(item) => Ok(Advance::Element(item)),
            None => {
                self.finish_epoch();
                Ok(Advance::EndOfEpoch)
            }
        }
    }

    /// Read up to `n` elements of the current epoch.
    ///
    /// Stops early at the epoch boundary without crossing it; the following
    /// [`advance`](Self::advance) reports the boundary.
    pub fn next_n(&mut self, n: usize) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        while items.len() < n {
            match self.pull()? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    /// Iterate over the rest of the current epoch.
    ///
    /// The iterator crosses the boundary when it ends, so the counters point at
    /// the next epoch once it returns `None`.
    pub fn epoch_items(&mut self) -> EpochItems<'_, S> {
        EpochItems {
            stream: self,
            done: false,
        }
    }

    pub fn checkpoint(&self) -> StreamState {
        StreamState {
            epoch: self.epoch,
            iteration_in_epoch: self.iteration_in_epoch,
            global_iteration: self.global_iteration,
            resume_token: self.source.resume_token(),
            epoch_size: self.epoch_size,
            source_traversal: Some(self.traversal),
            source_position: Some(self.traversal_position),
        }
    }

    /// Bring the stream back to the position recorded in `state`.
    ///
    /// The state is checked before the source is touched, so a rejected
    /// checkpoint leaves the stream as it was. If the source itself fails while
    /// restarting or replaying, the counters are unchanged but the stream is
    /// re-armed mid-traversal and should not be advanced; retry with another
    /// checkpoint or build a fresh stream.
    pub fn restore(&mut self, state: StreamState) -> Result<()> {
        let (traversal, position) = self.validate(&state)?;

        if let Some(token) = &state.resume_token {
            self.source.apply_resume_token(token)?;
        }
        self.source.start_epoch(traversal)?;
        if self.source.is_seekable() {
            self.source.seek(position)?;
        } else if position > 0 {
            warn!(
                position,
                traversal,
                "Source is not seekable, replaying traversal to restore position"
            );
            for consumed in 0..position {
                if self.source.next_element()?.is_none() {
                    return Err(TrainLoopError::invalid_checkpoint(format!(
                        "source ran out after {consumed} elements while replaying to {position}"
                    )));
                }
            }
        }

        self.epoch = state.epoch;
        self.iteration_in_epoch = state.iteration_in_epoch;
        self.global_iteration = state.global_iteration;
        self.traversal = traversal;
        self.traversal_position = position;
        self.armed = true;
        self.boundary_pending = false;

        debug!(
            epoch = self.epoch,
            iteration_in_epoch = self.iteration_in_epoch,
            global_iteration = self.global_iteration,
            "Stream restored"
        );
        Ok(())
    }

    /// Check `state` against this stream and resolve the source cursor
    /// `(traversal, position)` to restart at.
    fn validate(&self, state: &StreamState) -> Result<(u64, u64)> {
        if state.iteration_in_epoch > state.global_iteration {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "iteration_in_epoch {} exceeds global_iteration {}",
                state.iteration_in_epoch, state.global_iteration
            )));
        }
        if state.epoch == 0 && state.global_iteration != state.iteration_in_epoch {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "global_iteration {} does not match iteration_in_epoch {} in the first epoch",
                state.global_iteration, state.iteration_in_epoch
            )));
        }
        if state.epoch_size != self.epoch_size {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "checkpoint epoch_size {:?} does not match stream epoch_size {:?}",
                state.epoch_size, self.epoch_size
            )));
        }

        let cursor = match self.epoch_size {
            Some(size) => {
                if state.iteration_in_epoch > size {
                    return Err(TrainLoopError::invalid_checkpoint(format!(
                        "iteration_in_epoch {} exceeds epoch_size {size}",
                        state.iteration_in_epoch
                    )));
                }
                // One traversal may span several epochs, so the counters alone
                // do not locate the source.
                match (state.source_traversal, state.source_position) {
                    (Some(traversal), Some(position)) => (traversal, position),
                    _ => {
                        return Err(TrainLoopError::invalid_checkpoint(
                            "source_traversal and source_position are required with a fixed epoch_size",
                        ));
                    }
                }
            }
            None => {
                let traversal = state.source_traversal.unwrap_or(state.epoch);
                let position = state.source_position.unwrap_or(state.iteration_in_epoch);
                if traversal != state.epoch || position != state.iteration_in_epoch {
                    return Err(TrainLoopError::invalid_checkpoint(format!(
                        "source position ({traversal}, {position}) disagrees with epoch counters ({}, {})",
                        state.epoch, state.iteration_in_epoch
                    )));
                }
                (traversal, position)
            }
        };

        if let Some(len) = self.source.len_hint()
            && cursor.1 > len
        {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "source_position {} exceeds epoch length {len}",
                cursor.1
            )));
        }
        Ok(cursor)
    }

    /// Next element of the current epoch, or `None` when the epoch is over.
    /// Never crosses the boundary itself.
    fn pull(&mut self) -> Result<Option<S::Item>> {
        if self.boundary_pending {
            return Ok(None);
        }
        if let Some(size) = self.epoch_size
            && self.iteration_in_epoch >= size
        {
            self.boundary_pending = true;
            return Ok(None);
        }
        if !self.armed {
            self.source.start_epoch(self.traversal)?;
            self.traversal_position = 0;
            self.armed = true;
        }

        let mut next = self.source.next_element()?;
        if next.is_none() && self.epoch_size.is_some() && self.traversal_position > 0 {
            self.traversal += 1;
            self.traversal_position = 0;
            debug!(
                epoch = self.epoch,
                traversal = self.traversal,
                "Source exhausted inside fixed-size epoch, restarting traversal"
            );
            self.source.start_epoch(self.traversal)?;
            next = self.source.next_element()?;
        }

        match next {
            Some(item) => {
                self.iteration_in_epoch += 1;
                self.global_iteration += 1;
                self.traversal_position += 1;
                Ok(Some(item))
            }
            None => {
                self.boundary_pending = true;
                Ok(None)
            }
        }
    }

    fn finish_epoch(&mut self) {
        debug!(
            epoch = self.epoch,
            iterations = self.iteration_in_epoch,
            global_iteration = self.global_iteration,
            "Epoch finished"
        );
        self.epoch += 1;
        self.iteration_in_epoch = 0;
        self.boundary_pending = false;
        let source_dry = self.epoch_size.is_none() || self.traversal_position == 0;
        if source_dry {
            self.traversal = if self.epoch_size.is_none() {
                self.epoch
            } else {
                self.traversal + 1
            };
            self.traversal_position = 0;
            self.armed = false;
        }
    }
}

/// Iterator over the remainder of the current epoch, see [`Stream::epoch_items`].
pub struct EpochItems<'a, S: EpochSource> {
    stream: &'a mut Stream<S>,
    done: bool,
}

impl<S: EpochSource> Iterator for EpochItems<'_, S> {
    type Item = Result<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.advance() {
            Ok(Advance::Element(item)) => Some(Ok(item)),
            Ok(Advance::EndOfEpoch) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
