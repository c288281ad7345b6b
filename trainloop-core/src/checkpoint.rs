//! Run checkpoints — stream and tracker state saved together.
//!
//! The core only defines the in-memory shape. [`CheckpointStore`] is a small
//! convenience that persists it as JSON next to model weights.

use crate::config::RunConfig;
use crate::error::{Result, TrainLoopError};
use crate::stream::StreamState;
use crate::timer::Timer;
use crate::tracker::TrackerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stream and tracker snapshot taken at the same point of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub stream: StreamState,
    pub tracker: TrackerState,
    /// Training time so far, stored paused.
    pub timer: Timer,
    /// SHA-256 over the stream, tracker and timer fields.
    pub digest: String,
}

impl RunCheckpoint {
    pub fn new(stream: StreamState, tracker: TrackerState, timer: &Timer) -> Result<Self> {
        let timer = timer.snapshot();
        let digest = compute_digest(&stream, &tracker, &timer)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            stream,
            tracker,
            timer,
            digest,
        })
    }

    /// Fail with `InvalidCheckpoint` if the payload no longer matches its digest.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_digest(&self.stream, &self.tracker, &self.timer)?;
        if expected != self.digest {
            return Err(TrainLoopError::invalid_checkpoint(format!(
                "digest mismatch for checkpoint {}",
                self.id
            )));
        }
        Ok(())
    }
}

fn compute_digest(stream: &StreamState, tracker: &TrackerState, timer: &Timer) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(stream)?);
    hasher.update(serde_json::to_vec(tracker)?);
    hasher.update(serde_json::to_vec(timer)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Manifest entry describing one saved checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: String,
    pub epoch: u64,
    pub global_iteration: u64,
    pub best_value: Option<f64>,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Directory-backed store, one subdirectory per run.
///
/// Layout: `<base>/<run>/<id>.json` per checkpoint, `latest.json` with a copy
/// of the newest one, and `history.json` listing the kept entries oldest first.
pub struct CheckpointStore {
    base_dir: PathBuf,
    max_kept: usize,
}

impl CheckpointStore {
    pub fn new(base_dir: PathBuf, max_kept: usize) -> Self {
        Self {
            base_dir,
            max_kept: max_kept.max(1),
        }
    }

    /// Store rooted at `checkpoint_dir`, keeping `max_checkpoints` per run.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.checkpoint_dir.clone(), config.max_checkpoints)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(run_id)
    }

    /// Persist a checkpoint and prune the oldest ones beyond `max_kept`.
    pub fn save(&self, run_id: &str, checkpoint: &RunCheckpoint) -> Result<CheckpointEntry> {
        let dir = self.run_dir(run_id);
        let path = dir.join(format!("{}.json", checkpoint.id));
        atomic_write_json(&path, checkpoint)?;
        atomic_write_json(&dir.join("latest.json"), checkpoint)?;

        let entry = CheckpointEntry {
            id: checkpoint.id.clone(),
            epoch: checkpoint.stream.epoch,
            global_iteration: checkpoint.stream.global_iteration,
            best_value: checkpoint.tracker.best_value,
            path,
            created_at: checkpoint.created_at,
        };

        let mut history = self.history(run_id)?;
        history.push(entry.clone());
        while history.len() > self.max_kept {
            let evicted = history.remove(0);
            if evicted.path.exists() {
                std::fs::remove_file(&evicted.path)?;
            }
        }
        atomic_write_json(&dir.join("history.json"), &history)?;

        debug!(
            run_id,
            checkpoint = %entry.id,
            epoch = entry.epoch,
            global_iteration = entry.global_iteration,
            "Run checkpoint saved"
        );
        Ok(entry)
    }

    /// Kept checkpoints for a run, oldest first.
    pub fn history(&self, run_id: &str) -> Result<Vec<CheckpointEntry>> {
        Ok(load_json(&self.run_dir(run_id).join("history.json"))?.unwrap_or_default())
    }

    /// Newest checkpoint of a run, verified against its digest.
    pub fn load_latest(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let checkpoint: Option<RunCheckpoint> =
            load_json(&self.run_dir(run_id).join("latest.json"))?;
        if let Some(checkpoint) = &checkpoint {
            checkpoint.verify()?;
        }
        Ok(checkpoint)
    }

    /// A specific kept checkpoint, verified against its digest.
    pub fn load(&self, run_id: &str, checkpoint_id: &str) -> Result<RunCheckpoint> {
        let path = self.run_dir(run_id).join(format!("{checkpoint_id}.json"));
        let checkpoint: RunCheckpoint = load_json(&path)?.ok_or_else(|| {
            TrainLoopError::invalid_checkpoint(format!(
                "checkpoint {checkpoint_id} not found for run {run_id}"
            ))
        })?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }
}

/// Write pretty JSON to a `.tmp` sibling, then rename over the target.
fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
