//! Checkpoint and snapshot configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Local (per-rank) checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Root directory for per-step checkpoint directories
    pub root_path: PathBuf,

    /// Checkpoint every N training steps
    pub interval_steps: u64,

    /// Number of step directories to keep
    pub keep_count: usize,
}

impl CheckpointConfig {
    /// Whether a checkpoint is due at `step`
    pub fn is_checkpoint_step(&self, step: u64) -> bool {
        step > 0 && step % self.interval_steps == 0
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./checkpoints"),
            interval_steps: 100,
            keep_count: 5,
        }
    }
}

/// Consolidated snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Root directory for consolidated snapshots
    pub output_root: PathBuf,

    /// Target dtype tag for downcast ("bf16", "f16", or "f32")
    pub dtype: String,

    /// Persist on a background task instead of the caller's task
    pub background: bool,

    /// How long a gather may wait for all ranks before failing
    #[serde(with = "duration_ms")]
    pub gather_timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./snapshots"),
            dtype: "bf16".to_string(),
            background: true,
            gather_timeout: Duration::from_secs(120),
        }
    }
}

/// Duration serialization helper (milliseconds)
mod duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
