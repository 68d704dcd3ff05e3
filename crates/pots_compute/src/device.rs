//! Device identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Kind of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    /// General-purpose CPU.
    Cpu,
    /// NVIDIA GPU via CUDA.
    Cuda,
    /// AMD GPU via ROCm/HIP.
    Rocm,
    /// Apple GPU via Metal.
    Metal,
    /// Cross-platform GPU via WebGPU.
    Wgpu,
}

impl DeviceKind {
    /// Whether this is an accelerator rather than the CPU.
    #[must_use]
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, DeviceKind::Cpu)
    }

    /// Preference when auto-selecting (higher wins).
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            DeviceKind::Cuda => 5,
            DeviceKind::Rocm => 4,
            DeviceKind::Metal => 3,
            DeviceKind::Wgpu => 2,
            DeviceKind::Cpu => 0,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Rocm => "rocm",
            DeviceKind::Metal => "mps",
            DeviceKind::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Identifier of one device, written `kind[:index]` (e.g. `cpu`, `cuda:1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    /// The device kind.
    pub kind: DeviceKind,
    /// Index within its kind.
    pub index: u32,
}

impl DeviceId {
    /// Create a new device ID.
    #[must_use]
    pub const fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }

    /// The CPU.
    #[must_use]
    pub const fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, 0)
    }

    /// A CUDA GPU.
    #[must_use]
    pub const fn cuda(index: u32) -> Self {
        Self::new(DeviceKind::Cuda, index)
    }

    /// A WebGPU adapter.
    #[must_use]
    pub const fn wgpu(index: u32) -> Self {
        Self::new(DeviceKind::Wgpu, index)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

impl FromStr for DeviceId {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => (kind, Some(index)),
            None => (s.as_str(), None),
        };
        let kind = match kind {
            "cpu" => DeviceKind::Cpu,
            "cuda" | "gpu" => DeviceKind::Cuda,
            "rocm" | "hip" => DeviceKind::Rocm,
            "mps" | "metal" => DeviceKind::Metal,
            "wgpu" => DeviceKind::Wgpu,
            other => {
                return Err(ComputeError::UnsupportedDevice(format!(
                    "unknown device kind '{other}'"
                )))
            }
        };
        let index = match index {
            Some(i) => i
                .parse::<u32>()
                .map_err(|_| ComputeError::InvalidSpec(format!("bad device index in '{s}'")))?,
            None => 0,
        };
        Ok(Self::new(kind, index))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ComputeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}
