//! Collective gather contract and an in-process implementation
//!
//! Gathering a sharded tensor is a distributed barrier-like operation:
//! every rank must participate even though only the coordinating rank
//! keeps the assembled result.

use async_trait::async_trait;
use runtime_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Mutex};
use tokio::time::timeout;
use tracing::debug;

use crate::sharded::ShardedTensor;
use crate::tensor::Tensor;

/// Collective communication contract consumed by the snapshot writer
///
/// Implementations wrap whatever backend actually moves bytes between
/// ranks; the in-process [`LocalProcessGroup`] below is the one used for
/// tests and single-machine simulation.
#[async_trait]
pub trait Collective: Send + Sync {
    /// This rank's index
    fn rank(&self) -> usize;

    /// Number of participating ranks
    fn world_size(&self) -> usize;

    /// Gather all shards of `shard` into one full tensor
    ///
    /// Every rank must call this for the same tensor name, and the call
    /// suspends until all ranks have contributed. The assembled tensor is
    /// returned only on rank 0; other ranks get `None` and never hold a
    /// host-resident full copy.
    async fn gather_full(&self, name: &str, shard: &ShardedTensor) -> Result<Option<Tensor>>;
}

/// Shared state for one in-process gather round
struct Round {
    name: Option<String>,
    parts: Vec<Option<Tensor>>,
}

struct Shared {
    world_size: usize,
    gather_timeout: Duration,
    round: Mutex<Round>,
    barrier: Barrier,
}

/// In-process process group
///
/// Ranks are tokio tasks sharing one group; each task holds its own
/// [`LocalCollective`] handle. Gathers rendezvous on a reusable barrier,
/// so the group supports any number of sequential rounds.
pub struct LocalProcessGroup {
    shared: Arc<Shared>,
}

impl LocalProcessGroup {
    /// Create a group for `world_size` in-process ranks
    pub fn new(world_size: usize, gather_timeout: Duration) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world_size must be at least 1".to_string(),
            });
        }
        Ok(Self {
            shared: Arc::new(Shared {
                world_size,
                gather_timeout,
                round: Mutex::new(Round {
                    name: None,
                    parts: (0..world_size).map(|_| None).collect(),
                }),
                barrier: Barrier::new(world_size),
            }),
        })
    }

    /// Handle for one rank
    pub fn handle(&self, rank: usize) -> Result<LocalCollective> {
        if rank >= self.shared.world_size {
            return Err(Error::InvalidConfig {
                message: format!(
                    "rank {} out of range for world_size {}",
                    rank, self.shared.world_size
                ),
            });
        }
        Ok(LocalCollective {
            rank,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// One rank's view of a [`LocalProcessGroup`]
#[derive(Clone)]
pub struct LocalCollective {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalCollective {
    async fn rendezvous(&self, name: &str) -> Result<()> {
        timeout(self.shared.gather_timeout, self.shared.barrier.wait())
            .await
            .map_err(|_| Error::GatherInconsistency {
                tensor: name.to_string(),
                reason: format!(
                    "not all {} ranks arrived within {:?}",
                    self.shared.world_size, self.shared.gather_timeout
                ),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    async fn gather_full(&self, name: &str, shard: &ShardedTensor) -> Result<Option<Tensor>> {
        let spec = shard.spec();
        if spec.num_shards != self.shared.world_size {
            return Err(Error::GatherInconsistency {
                tensor: name.to_string(),
                reason: format!(
                    "tensor has {} shards but the group has {} ranks",
                    spec.num_shards, self.shared.world_size
                ),
            });
        }

        // Contribute this rank's shard to the round
        {
            let mut round = self.shared.round.lock().await;
            match &round.name {
                None => round.name = Some(name.to_string()),
                Some(current) if current != name => {
                    return Err(Error::GatherInconsistency {
                        tensor: name.to_string(),
                        reason: format!("rank {} joined while '{}' is in progress", self.rank, current),
                    });
                }
                Some(_) => {}
            }
            if round.parts[spec.shard_index].is_some() {
                return Err(Error::GatherInconsistency {
                    tensor: name.to_string(),
                    reason: format!("shard {} contributed twice", spec.shard_index),
                });
            }
            round.parts[spec.shard_index] = Some(shard.local().clone());
        }

        // Wait for every rank to contribute
        self.rendezvous(name).await?;

        // Only the coordinator materializes the full tensor
        let result = if self.rank == 0 {
            let mut round = self.shared.round.lock().await;
            let parts: Vec<Tensor> = round
                .parts
                .iter_mut()
                .enumerate()
                .map(|(i, slot)| {
                    slot.take().ok_or_else(|| Error::GatherInconsistency {
                        tensor: name.to_string(),
                        reason: format!("shard {} missing after rendezvous", i),
                    })
                })
                .collect::<Result<_>>()?;
            round.name = None;

            let full = ShardedTensor::assemble(name, &parts)?;
            debug!(tensor = name, shape = ?full.shape(), "Assembled full tensor");
            Some(full)
        } else {
            None
        };

        // Hold the round open until the coordinator is done with it
        self.rendezvous(name).await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharded::ShardSpec;
    use crate::tensor::DType;

    fn shard(rows: &[f32], num_shards: usize, index: usize) -> ShardedTensor {
        let local = Tensor::from_f32(vec![1, rows.len()], rows).unwrap();
        ShardedTensor::new(local, ShardSpec::new(num_shards, index).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gather_two_ranks() {
        let group = LocalProcessGroup::new(2, Duration::from_secs(5)).unwrap();
        let r0 = group.handle(0).unwrap();
        let r1 = group.handle(1).unwrap();

        let t0 = tokio::spawn(async move { r0.gather_full("w", &shard(&[1.0, 2.0], 2, 0)).await });
        let t1 = tokio::spawn(async move { r1.gather_full("w", &shard(&[3.0, 4.0], 2, 1)).await });

        let full = t0.await.unwrap().unwrap().expect("rank 0 gets the tensor");
        assert_eq!(full.shape(), &[2, 2]);
        assert_eq!(full.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        assert!(t1.await.unwrap().unwrap().is_none(), "rank 1 keeps nothing");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gather_sequential_rounds() {
        let group = LocalProcessGroup::new(2, Duration::from_secs(5)).unwrap();

        for round in 0..3 {
            let r0 = group.handle(0).unwrap();
            let r1 = group.handle(1).unwrap();
            let name = format!("w{}", round);
            let n0 = name.clone();
            let n1 = name.clone();

            let t0 = tokio::spawn(async move { r0.gather_full(&n0, &shard(&[1.0], 2, 0)).await });
            let t1 = tokio::spawn(async move { r1.gather_full(&n1, &shard(&[2.0], 2, 1)).await });

            let full = t0.await.unwrap().unwrap().unwrap();
            assert_eq!(full.to_f32_vec(), vec![1.0, 2.0]);
            t1.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_gather_single_rank() {
        let group = LocalProcessGroup::new(1, Duration::from_secs(1)).unwrap();
        let r0 = group.handle(0).unwrap();

        let full = r0.gather_full("w", &shard(&[7.0], 1, 0)).await.unwrap();
        assert_eq!(full.unwrap().to_f32_vec(), vec![7.0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_rank_times_out() {
        let group = LocalProcessGroup::new(2, Duration::from_millis(100)).unwrap();
        let r0 = group.handle(0).unwrap();

        // Rank 1 never calls gather
        let err = r0
            .gather_full("w", &shard(&[1.0], 2, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatherInconsistency { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shard_count_mismatch_rejected() {
        let group = LocalProcessGroup::new(2, Duration::from_secs(1)).unwrap();
        let r0 = group.handle(0).unwrap();

        let err = r0
            .gather_full("w", &shard(&[1.0], 3, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatherInconsistency { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cast_before_gather_matches_cast_after() {
        // Downcast-then-gather must be numerically equivalent to
        // gather-then-downcast; only the cost differs.
        let rows0 = [0.1f32, 1.7];
        let rows1 = [3.3f32, -2.2];

        let gather = |a: ShardedTensor, b: ShardedTensor| async move {
            let group = LocalProcessGroup::new(2, Duration::from_secs(5)).unwrap();
            let r0 = group.handle(0).unwrap();
            let r1 = group.handle(1).unwrap();
            let t0 = tokio::spawn(async move { r0.gather_full("w", &a).await });
            let t1 = tokio::spawn(async move { r1.gather_full("w", &b).await });
            let full = t0.await.unwrap().unwrap().unwrap();
            t1.await.unwrap().unwrap();
            full
        };

        let pre = gather(
            shard(&rows0, 2, 0).cast(DType::BF16),
            shard(&rows1, 2, 1).cast(DType::BF16),
        )
        .await;
        let post = gather(shard(&rows0, 2, 0), shard(&rows1, 2, 1))
            .await
            .cast(DType::BF16);

        assert_eq!(pre.to_f32_vec(), post.to_f32_vec());
    }
}
