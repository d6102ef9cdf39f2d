//! Host-resident tensors with explicit dtype

use half::{bf16, f16};
use runtime_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element dtype of a host tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE float
    F32,

    /// 16-bit IEEE float
    F16,

    /// bfloat16 (truncated f32)
    BF16,
}

impl DType {
    /// Size of one element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    /// Parse a dtype tag as it appears in configuration
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "f32" => Ok(DType::F32),
            "f16" => Ok(DType::F16),
            "bf16" => Ok(DType::BF16),
            other => Err(Error::InvalidConfig {
                message: format!("unknown dtype tag: {}", other),
            }),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
        }
    }
}

/// A dense, row-major, host-resident tensor
///
/// Element data is stored as little-endian bytes of the declared dtype.
/// This is the unit of state the checkpoint layer serializes; it carries
/// no device or autograd semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Build an f32 tensor from values, validating the element count
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "shape {:?} holds {} elements but {} values given",
                    shape,
                    numel,
                    values.len()
                ),
            });
        }
        Ok(Self {
            dtype: DType::F32,
            shape,
            data: encode_f32s(values, DType::F32),
        })
    }

    /// Build a zero-filled tensor of the given shape and dtype
    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            dtype,
            shape,
            data: vec![0u8; numel * dtype.size_bytes()],
        }
    }

    /// Reconstruct a tensor from raw little-endian bytes
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel * dtype.size_bytes() != data.len() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "shape {:?} of {} needs {} bytes but {} given",
                    shape,
                    dtype,
                    numel * dtype.size_bytes(),
                    data.len()
                ),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the element data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Raw little-endian element bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode all elements to f32
    pub fn to_f32_vec(&self) -> Vec<f32> {
        decode_f32s(&self.data, self.dtype)
    }

    /// Cast to the target dtype
    ///
    /// A no-op when the dtype already matches. Downcasting rounds through
    /// the target format and loses precision as expected.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype {
            return self.clone();
        }
        let values = self.to_f32_vec();
        Tensor {
            dtype,
            shape: self.shape.clone(),
            data: encode_f32s(&values, dtype),
        }
    }
}

fn encode_f32s(values: &[f32], dtype: DType) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * dtype.size_bytes());
    match dtype {
        DType::F32 => {
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        DType::F16 => {
            for v in values {
                out.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
            }
        }
        DType::BF16 => {
            for v in values {
                out.extend_from_slice(&bf16::from_f32(*v).to_le_bytes());
            }
        }
    }
    out
}

fn decode_f32s(data: &[u8], dtype: DType) -> Vec<f32> {
    match dtype {
        DType::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        DType::F16 => data
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        DType::BF16 => data
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
    }
}
