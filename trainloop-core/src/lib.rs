//! # trainloop-core — Training Loop Control
//!
//! Resumable epoch accounting and early stopping for training loops.
//!
//! - [`Stream`] wraps a restartable [`EpochSource`], counts epochs and
//!   iterations, and reports epoch boundaries as [`Advance::EndOfEpoch`].
//! - [`ProgressTracker`] consumes one metric per call and decides between
//!   [`Decision::Improved`], [`Decision::NoImprovement`] and [`Decision::Stop`].
//! - [`TrainingLoop`] ties the two together through caller closures.
//!
//! Stream and tracker never reference each other and each checkpoints
//! independently; [`RunCheckpoint`] bundles both for storage.
//!
//! ```
//! use trainloop_core::{Advance, Decision, Direction, ProgressTracker, Stream, VecSource};
//!
//! let mut stream = Stream::new(VecSource::new(vec!["a", "b", "c"]));
//! let mut tracker = ProgressTracker::new(3, Direction::Max)?;
//! loop {
//!     match stream.advance()? {
//!         Advance::Element(_batch) => { /* train step */ }
//!         Advance::EndOfEpoch => {
//!             if tracker.observe(0.5)? == Decision::Stop {
//!                 break;
//!             }
//!         }
//!     }
//! }
//! assert_eq!(stream.current_epoch(), 4);
//! assert_eq!(stream.global_iteration(), 12);
//! # Ok::<(), trainloop_core::TrainLoopError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod source;
pub mod stream;
pub mod timer;
pub mod tracker;

pub use checkpoint::{CheckpointEntry, CheckpointStore, RunCheckpoint};
pub use config::{TrainLoopConfig, load_config};
pub use error::{Result, TrainLoopError};
pub use runner::{EpochContext, RunSummary, StopReason, TrainingLoop};
pub use source::{EpochSource, FnSource, ShuffledSource, VecSource, from_fn};
pub use stream::{Advance, Stream, StreamState};
pub use timer::Timer;
pub use tracker::{Decision, Direction, ProgressTracker, TrackerPhase, TrackerState};
