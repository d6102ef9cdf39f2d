//! Rank and world-size discovery
//!
//! Each process in the job learns its identity from the launcher
//! environment. Rank 0 is the coordinating process for every
//! write-side-effecting consolidation step.

use crate::{Error, Result};

/// Identity of this process within the distributed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    /// Global rank across all nodes
    pub rank: usize,

    /// Rank within the local node
    pub local_rank: usize,

    /// Total number of processes in the job
    pub world_size: usize,
}

impl WorldInfo {
    /// Create a world info, validating rank bounds
    pub fn new(rank: usize, local_rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world_size must be at least 1".to_string(),
            });
        }
        if rank >= world_size {
            return Err(Error::InvalidConfig {
                message: format!("rank {} out of range for world_size {}", rank, world_size),
            });
        }
        Ok(Self {
            rank,
            local_rank,
            world_size,
        })
    }

    /// Discover rank/world-size from the launcher environment
    ///
    /// Reads `RANK`, `LOCAL_RANK`, and `WORLD_SIZE`. Absent variables fall
    /// back to a single-process world (rank 0 of 1).
    pub fn from_env() -> Result<Self> {
        let rank = env_usize("RANK", 0)?;
        let local_rank = env_usize("LOCAL_RANK", 0)?;
        let world_size = env_usize("WORLD_SIZE", 1)?;
        Self::new(rank, local_rank, world_size)
    }

    /// Whether this process is the coordinating process (rank 0)
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Whether this is a single-process job
    pub fn is_single_process(&self) -> bool {
        self.world_size == 1
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|_| Error::InvalidConfig {
            message: format!("{} is not a valid integer: {}", key, value),
        }),
        Err(_) => Ok(default),
    }
}
