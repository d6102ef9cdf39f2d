//! Tensor sharding for distributed checkpointing
//!
//! This crate provides:
//! - **Host tensors** with explicit dtype and downcast support
//! - **Sharded tensors** whose rows are partitioned across ranks
//! - The **collective contract** for gathering a full tensor onto the
//!   coordinating rank, plus an in-process group for tests and
//!   single-machine simulation
//!
//! # Example
//!
//! ```rust
//! use tensor_shard::{DType, ShardSpec, ShardedTensor, Tensor};
//!
//! // Rank 0's half of a 2x2 weight matrix
//! let local = Tensor::from_f32(vec![1, 2], &[1.0, 2.0]).unwrap();
//! let shard = ShardedTensor::new(local, ShardSpec::new(2, 0).unwrap()).unwrap();
//!
//! // Downcast before gathering: shard-local, cheap
//! let shard = shard.cast(DType::BF16);
//! assert_eq!(shard.local().dtype(), DType::BF16);
//! ```

mod collective;
mod sharded;
mod tensor;

pub use collective::{Collective, LocalCollective, LocalProcessGroup};
pub use sharded::{ShardSpec, ShardedTensor};
pub use tensor::{DType, Tensor};
