//! Per-rank full-state checkpoints for training resumption
//!
//! Every rank independently persists its own shard of the training state,
//! one file per (step, rank), with no cross-rank coordination at write
//! time. A rank only ever reads back its own file.

use bytes::Bytes;
use runtime_core::{CheckpointConfig, Error, Result, Step, TrainingProgress, WorldInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use storage::{LocalStorage, StorageBackend};
use tracing::{info, instrument, warn};

use crate::state::{StateDict, Stateful};

/// Extension of local checkpoint files
const CHECKPOINT_EXT: &str = "ckpt";

/// Everything one rank needs to resume training exactly
///
/// Identity is (step, rank); the rank lives in the file name, the step in
/// the directory name.
#[derive(Debug, Serialize, Deserialize)]
struct LocalCheckpointRecord {
    model: StateDict,
    optimizers: Vec<StateDict>,
    training_progress: TrainingProgress,
    scheduler: StateDict,
}

/// Writer/reader for per-rank checkpoint files
///
/// Layout: `root/step_<N>/local_rank_<R>.ckpt`. Including the rank in the
/// file name guarantees no two processes write the same file.
pub struct LocalCheckpointer {
    world: WorldInfo,
    storage: LocalStorage,
}

impl LocalCheckpointer {
    pub fn new<P: AsRef<Path>>(root: P, world: WorldInfo) -> Self {
        Self {
            world,
            storage: LocalStorage::new(root),
        }
    }

    /// Build a checkpointer rooted at the configured path
    pub fn from_config(config: &CheckpointConfig, world: WorldInfo) -> Self {
        Self::new(&config.root_path, world)
    }

    /// Root directory holding the per-step directories
    pub fn root(&self) -> &Path {
        self.storage.base_path()
    }

    fn step_dir_name(step: Step) -> String {
        format!("step_{}", step)
    }

    fn rank_file_rel(&self, step: Step) -> String {
        format!(
            "{}/local_rank_{}.{}",
            Self::step_dir_name(step),
            self.world.local_rank,
            CHECKPOINT_EXT
        )
    }

    /// Save a full per-rank checkpoint for the current step
    ///
    /// Extracts state from all collaborators and writes one record to this
    /// rank's file under `root/step_<N>/`. The write is atomic
    /// (tmp + rename), so a crash mid-write never leaves a truncated file
    /// under the final name. Re-invoking for the same step overwrites.
    #[instrument(skip_all, fields(step = progress.step, rank = self.world.rank))]
    pub async fn save<M, O, S>(
        &self,
        model: &M,
        optimizers: &[O],
        progress: &TrainingProgress,
        scheduler: &S,
    ) -> Result<PathBuf>
    where
        M: Stateful,
        O: Stateful,
        S: Stateful,
    {
        let start = Instant::now();

        let record = LocalCheckpointRecord {
            model: model.extract_state(),
            optimizers: optimizers.iter().map(Stateful::extract_state).collect(),
            training_progress: *progress,
            scheduler: scheduler.extract_state(),
        };

        let encoded = bincode::serialize(&record).map_err(|e| Error::Serialization(e.to_string()))?;
        let rel = self.rank_file_rel(progress.step);
        let size = self.storage.write(&rel, Bytes::from(encoded)).await?;

        let path = self.storage.base_path().join(&rel);
        info!(
            path = %path.display(),
            size_bytes = size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Local checkpoint saved"
        );
        Ok(path)
    }

    /// Load this rank's checkpoint for `step` and restore all collaborators
    ///
    /// `progress` is overwritten in place through the `&mut` reference
    /// rather than returned; callers holding other copies of the old value
    /// must replace them (explicit in/out contract).
    ///
    /// A missing rank file fails with `CheckpointNotFound`; an unreadable
    /// record with `CheckpointCorrupted`. If a restore fails after an
    /// earlier collaborator was already mutated, the error is wrapped as
    /// `RestoreInconsistent` and the caller must not continue training
    /// with these objects.
    #[instrument(skip_all, fields(step = step, rank = self.world.rank))]
    pub async fn load<M, O, S>(
        &self,
        step: Step,
        model: &mut M,
        optimizers: &mut [O],
        progress: &mut TrainingProgress,
        scheduler: &mut S,
    ) -> Result<()>
    where
        M: Stateful,
        O: Stateful,
        S: Stateful,
    {
        let rel = self.rank_file_rel(step);
        let path = self.storage.base_path().join(&rel);

        let data = match self.storage.read(&rel).await {
            Ok(data) => data,
            Err(Error::StoragePathNotFound { .. }) => {
                return Err(Error::CheckpointNotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let record: LocalCheckpointRecord =
            bincode::deserialize(&data).map_err(|e| Error::CheckpointCorrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if record.optimizers.len() != optimizers.len() {
            return Err(Error::CheckpointCorrupted {
                path: path.display().to_string(),
                reason: format!(
                    "record has {} optimizer states, caller has {}",
                    record.optimizers.len(),
                    optimizers.len()
                ),
            });
        }

        // Restore order matches save order; any failure past the first
        // mutation leaves the collaborators inconsistent.
        model.restore_state(record.model, true)?;

        for (index, (optimizer, state)) in
            optimizers.iter_mut().zip(record.optimizers).enumerate()
        {
            optimizer
                .restore_state(state, true)
                .map_err(|e| Error::RestoreInconsistent {
                    stage: format!("optimizer[{}]", index),
                    source: Box::new(e),
                })?;
        }

        *progress = record.training_progress;

        scheduler
            .restore_state(record.scheduler, true)
            .map_err(|e| Error::RestoreInconsistent {
                stage: "scheduler".to_string(),
                source: Box::new(e),
            })?;

        info!(path = %path.display(), "Local checkpoint restored");
        Ok(())
    }

    /// Highest step number with a checkpoint directory, if any
    pub async fn latest_step(&self) -> Result<Option<Step>> {
        Ok(self.step_numbers().await?.into_iter().max())
    }

    /// Delete the oldest step directories beyond `keep_count`
    ///
    /// Retention is per rank-local view of the root; in a multi-rank job
    /// every rank prunes the same directories, and deletion races are
    /// tolerated.
    #[instrument(skip(self))]
    pub async fn prune(&self, keep_count: usize) -> Result<()> {
        let mut steps = self.step_numbers().await?;
        steps.sort_unstable();

        while steps.len() > keep_count {
            let step = steps.remove(0);
            let dir = Self::step_dir_name(step);
            match self.storage.delete(&dir).await {
                Ok(()) => info!(step, "Pruned old checkpoint step"),
                Err(Error::StoragePathNotFound { .. }) => {}
                Err(e) => warn!(step, error = %e, "Failed to prune checkpoint step"),
            }
        }
        Ok(())
    }

    async fn step_numbers(&self) -> Result<Vec<Step>> {
        let dirs = self.storage.list_dirs("").await?;
        Ok(dirs
            .iter()
            .filter_map(|name| name.strip_prefix("step_"))
            .filter_map(|n| n.parse::<Step>().ok())
            .collect())
    }
}
