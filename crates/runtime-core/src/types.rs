//! Core type definitions for the distributed checkpointing runtime

use serde::{Deserialize, Serialize};

/// Training step counter
pub type Step = u64;

/// Process rank within the distributed job
pub type Rank = usize;

/// Training progress counters
///
/// Mutated by the training loop each step and checkpointed/restored
/// atomically with model state. All counters are monotonically
/// non-decreasing across successful checkpoint/restore cycles within a
/// single run. Never persisted on its own, only inside a checkpoint record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Total tokens consumed since the start of the run
    pub total_tokens: u64,

    /// Current training step
    pub step: Step,

    /// Total samples consumed since the start of the run
    pub total_samples: u64,
}

impl TrainingProgress {
    /// Create progress counters starting from zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance counters by one training step
    pub fn record_step(&mut self, tokens: u64, samples: u64) {
        self.step += 1;
        self.total_tokens += tokens;
        self.total_samples += samples;
    }
}
