//! Tensor descriptors attached to node inputs and outputs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    #[default]
    F32,
    F16,
    Bf16,
    I64,
    I32,
    I8,
    U8,
    Bool,
}

impl DType {
    pub fn element_size(&self) -> u64 {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::Bf16 => 2,
            DType::I64 => 8,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }
}

/// Memory layout of a tensor on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    #[default]
    Nd,
    Nchw,
    Nhwc,
    Nc1hwc0,
    FractalZ,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorDesc {
    #[serde(default)]
    pub shape: Vec<u64>,
    #[serde(default)]
    pub dtype: DType,
    #[serde(default)]
    pub format: Format,
}

impl TensorDesc {
    pub fn new(shape: Vec<u64>, dtype: DType, format: Format) -> Self {
        Self {
            shape,
            dtype,
            format,
        }
    }

    pub fn element_count(&self) -> u64 {
        self.shape.iter().fold(1u64, |acc, d| acc.saturating_mul(*d))
    }

    pub fn byte_size(&self) -> u64 {
        self.element_count().saturating_mul(self.dtype.element_size())
    }

    /// Same format and element type. A graph-output edge between two such
    /// descriptors forwards the buffer untouched.
    pub fn is_layout_compatible(&self, other: &TensorDesc) -> bool {
        self.format == other.format && self.dtype == other.dtype
    }
}
