//! Iteration sources — restartable, per-epoch traversals over arbitrary data.
//!
//! An [`EpochSource`] turns something that can be iterated once per call
//! (a data loader, a generator, a list) into a sequence the
//! [`Stream`](crate::stream::Stream) can re-arm at every epoch. Counters do not
//! live here; a source only knows how to start a traversal and yield the next
//! element of it.

use crate::config::StreamConfig;
use crate::error::{Result, TrainLoopError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A data source that can produce a fresh traversal on demand.
pub trait EpochSource {
    type Item;

    /// Discard any live traversal and start a new one.
    ///
    /// `traversal` is the index of the traversal being started. It equals the
    /// epoch number unless the stream uses a fixed epoch size, in which case
    /// one traversal can span several epochs. Sources that reshuffle may use it
    /// to derive their ordering; sources that don't can ignore it.
    fn start_epoch(&mut self, traversal: u64) -> Result<()>;

    /// Next element of the live traversal, or `None` once it is exhausted.
    ///
    /// Starts traversal 0 when called before any [`start_epoch`](Self::start_epoch).
    fn next_element(&mut self) -> Result<Option<Self::Item>>;

    /// Number of elements in one traversal, if the source can tell.
    fn len_hint(&self) -> Option<u64> {
        None
    }

    /// Whether [`seek`](Self::seek) can position the live traversal directly.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Skip to `position` within the live traversal without yielding elements.
    fn seek(&mut self, position: u64) -> Result<()> {
        Err(TrainLoopError::configuration(format!(
            "source does not support seeking (requested position {position})"
        )))
    }

    /// Opaque state needed to reproduce the live traversal after a restart.
    fn resume_token(&self) -> Option<serde_json::Value> {
        None
    }

    /// Apply a token previously produced by [`resume_token`](Self::resume_token).
    fn apply_resume_token(&mut self, _token: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Source backed by a factory closure producing a fresh iterable per traversal.
///
/// The factory may fail (for example when a loader cannot open its shards);
/// the failure surfaces as [`TrainLoopError::ExhaustedSourceMisuse`] from the
/// call that needed a new traversal. Not seekable: restoring a stream over an
/// `FnSource` replays the traversal up to the recorded position.
pub struct FnSource<F, I>
where
    I: IntoIterator,
{
    factory: F,
    live: Option<I::IntoIter>,
    exhausted: bool,
}

impl<F, I> FnSource<F, I>
where
    F: FnMut() -> anyhow::Result<I>,
    I: IntoIterator,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            live: None,
            exhausted: false,
        }
    }

    /// Whether the live traversal has run out of elements.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Build an [`FnSource`] from a factory that cannot fail.
pub fn from_fn<G, I>(mut factory: G) -> FnSource<impl FnMut() -> anyhow::Result<I>, I>
where
    G: FnMut() -> I,
    I: IntoIterator,
{
    FnSource::new(move || Ok(factory()))
}

impl<F, I> EpochSource for FnSource<F, I>
where
    F: FnMut() -> anyhow::Result<I>,
    I: IntoIterator,
{
    type Item = I::Item;

    fn start_epoch(&mut self, _traversal: u64) -> Result<()> {
        self.live = None;
        let iterable =
            (self.factory)().map_err(|e| TrainLoopError::source_failure(format!("{e:#}")))?;
        self.live = Some(iterable.into_iter());
        self.exhausted = false;
        Ok(())
    }

    fn next_element(&mut self) -> Result<Option<Self::Item>> {
        if self.live.is_none() {
            self.start_epoch(0)?;
        }
        if self.exhausted {
            return Ok(None);
        }
        let next = self.live.as_mut().and_then(|iter| iter.next());
        if next.is_none() {
            self.exhausted = true;
        }
        Ok(next)
    }
}

/// In-order traversal over an owned list. Seekable and length-aware.
#[derive(Debug, Clone)]
pub struct VecSource<T> {
    items: Vec<T>,
    position: usize,
    started: bool,
}

impl<T: Clone> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: 0,
            started: false,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone> EpochSource for VecSource<T> {
    type Item = T;

    fn start_epoch(&mut self, _traversal: u64) -> Result<()> {
        self.position = 0;
        self.started = true;
        Ok(())
    }

    fn next_element(&mut self) -> Result<Option<T>> {
        if !self.started {
            self.start_epoch(0)?;
        }
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.items.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.items.len() as u64 {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "seek position {position} beyond source length {}",
                self.items.len()
            )));
        }
        self.position = position as usize;
        Ok(())
    }
}

/// Resume token of a [`ShuffledSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleToken {
    pub seed: u64,
    pub traversal: u64,
}

/// Traversal over an owned list in a per-traversal random order.
///
/// The order of traversal `t` is fully determined by `(seed, t)`, so a
/// restored stream can rebuild the exact permutation and seek into it.
#[derive(Debug, Clone)]
pub struct ShuffledSource<T> {
    items: Vec<T>,
    seed: u64,
    traversal: u64,
    order: Vec<usize>,
    position: usize,
    started: bool,
}

impl<T: Clone> ShuffledSource<T> {
    pub fn new(items: Vec<T>, seed: u64) -> Self {
        Self {
            items,
            seed,
            traversal: 0,
            order: Vec::new(),
            position: 0,
            started: false,
        }
    }

    /// Shuffle with `shuffle_seed`, or a freshly drawn seed when unset.
    ///
    /// The seed is part of the resume token, so a random seed still resumes
    /// into the same order.
    pub fn from_config(items: Vec<T>, config: &StreamConfig) -> Self {
        let seed = config.shuffle_seed.unwrap_or_else(rand::random);
        Self::new(items, seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Index permutation used for the given traversal.
    pub fn permutation(&self, traversal: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        let mut rng = StdRng::seed_from_u64(traversal_seed(self.seed, traversal));
        order.shuffle(&mut rng);
        order
    }
}

/// Per-traversal seed derived from the base seed.
fn traversal_seed(seed: u64, traversal: u64) -> u64 {
    seed ^ traversal.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl<T: Clone> EpochSource for ShuffledSource<T> {
    type Item = T;

    fn start_epoch(&mut self, traversal: u64) -> Result<()> {
        self.order = self.permutation(traversal);
        self.traversal = traversal;
        self.position = 0;
        self.started = true;
        Ok(())
    }

    fn next_element(&mut self) -> Result<Option<T>> {
        if !self.started {
            self.start_epoch(0)?;
        }
        let item = self
            .order
            .get(self.position)
            .map(|&index| self.items[index].clone());
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.items.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.order.len() as u64 {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "seek position {position} beyond source length {}",
                self.order.len()
            )));
        }
        self.position = position as usize;
        Ok(())
    }

    fn resume_token(&self) -> Option<serde_json::Value> {
        serde_json::to_value(ShuffleToken {
            seed: self.seed,
            traversal: self.traversal,
        })
        .ok()
    }

    fn apply_resume_token(&mut self, token: &serde_json::Value) -> Result<()> {
        let token: ShuffleToken = serde_json::from_value(token.clone()).map_err(|e| {
            TrainLoopError::invalid_checkpoint(format!("malformed shuffle token: {e}"))
        })?;
        self.seed = token.seed;
        self.traversal = token.traversal;
        self.started = false;
        Ok(())
    }
}
