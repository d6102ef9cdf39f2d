//! Tensors partitioned across ranks along the leading dimension

use runtime_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Tensor};

/// Placement of one shard within a row-partitioned tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    /// Total number of shards (one per participating rank)
    pub num_shards: usize,

    /// Which shard this is, in leading-dimension order
    pub shard_index: usize,
}

impl ShardSpec {
    /// Create a spec, validating the shard index
    pub fn new(num_shards: usize, shard_index: usize) -> Result<Self> {
        if num_shards == 0 || shard_index >= num_shards {
            return Err(Error::InvalidConfig {
                message: format!(
                    "shard index {} invalid for {} shards",
                    shard_index, num_shards
                ),
            });
        }
        Ok(Self {
            num_shards,
            shard_index,
        })
    }
}

/// One rank's portion of a logically whole tensor
///
/// Each rank exclusively owns its shard. The full tensor only ever exists
/// as a temporary copy produced by a collective gather; it is never stored
/// here. Sharding is along dimension 0 (row partitioning), so assembly is
/// concatenation in shard order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardedTensor {
    local: Tensor,
    spec: ShardSpec,
}

impl ShardedTensor {
    /// Wrap a local shard. The shard must have at least one dimension.
    pub fn new(local: Tensor, spec: ShardSpec) -> Result<Self> {
        if local.shape().is_empty() {
            return Err(Error::InvalidConfig {
                message: "sharded tensors must have at least one dimension".to_string(),
            });
        }
        Ok(Self { local, spec })
    }

    /// This rank's local shard
    pub fn local(&self) -> &Tensor {
        &self.local
    }

    pub fn spec(&self) -> ShardSpec {
        self.spec
    }

    pub fn dtype(&self) -> DType {
        self.local.dtype()
    }

    /// Cast the local shard to the target dtype
    ///
    /// Shard-local and cheap: no communication, and when downcasting it
    /// shrinks the bytes every rank later contributes to a gather.
    pub fn cast(&self, dtype: DType) -> ShardedTensor {
        ShardedTensor {
            local: self.local.cast(dtype),
            spec: self.spec,
        }
    }

    /// Assemble a full tensor from all shards in shard order
    ///
    /// Validates that every shard agrees on dtype and trailing dimensions.
    /// Used by collective implementations on the gathering rank.
    pub fn assemble(name: &str, parts: &[Tensor]) -> Result<Tensor> {
        let first = parts.first().ok_or_else(|| Error::GatherInconsistency {
            tensor: name.to_string(),
            reason: "no shards contributed".to_string(),
        })?;

        let dtype = first.dtype();
        let tail = &first.shape()[1..];
        let mut rows = 0usize;
        for part in parts {
            if part.dtype() != dtype || part.shape().is_empty() || &part.shape()[1..] != tail {
                return Err(Error::GatherInconsistency {
                    tensor: name.to_string(),
                    reason: format!(
                        "shard geometry mismatch: {:?}/{} vs {:?}/{}",
                        part.shape(),
                        part.dtype(),
                        first.shape(),
                        dtype
                    ),
                });
            }
            rows += part.shape()[0];
        }

        let mut shape = vec![rows];
        shape.extend_from_slice(tail);
        let mut data = Vec::with_capacity(parts.iter().map(Tensor::size_bytes).sum());
        for part in parts {
            data.extend_from_slice(part.data());
        }

        Tensor::from_raw(dtype, shape, data)
    }
}
