//! Compute device selection.
//!
//! Devices are requested explicitly and resolved against the backends
//! compiled into this build. A malformed device string fails with
//! [`CoreError::InvalidDevice`]. A well-formed request that cannot be
//! honoured fails with [`CoreError::DeviceUnavailable`]; there is no
//! silent fallback to the CPU. Callers that want a fallback must retry
//! with [`DeviceSpec::Cpu`] themselves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A requested compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    /// Host CPU.
    #[default]
    Cpu,
    /// A GPU by ordinal; `None` lets the backend pick its default adapter.
    Gpu(Option<usize>),
}

impl DeviceSpec {
    /// Whether this spec asks for an accelerator.
    #[must_use]
    pub const fn is_gpu(&self) -> bool {
        matches!(self, DeviceSpec::Gpu(_))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Gpu(None) => write!(f, "gpu"),
            DeviceSpec::Gpu(Some(index)) => write!(f, "gpu:{}", index),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = CoreError;

    /// Parse `cpu`, `gpu`, `gpu:N`, `cuda`, `cuda:N` (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let (kind, index) = match lower.split_once(':') {
            Some((kind, index)) => {
                let index = index.parse::<usize>().map_err(|_| CoreError::InvalidDevice {
                    spec: s.to_string(),
                    reason: format!("'{}' is not a device ordinal", index),
                })?;
                (kind.to_string(), Some(index))
            }
            None => (lower.clone(), None),
        };

        match (kind.as_str(), index) {
            ("cpu", None) => Ok(DeviceSpec::Cpu),
            ("gpu" | "cuda" | "wgpu", index) => Ok(DeviceSpec::Gpu(index)),
            _ => Err(CoreError::InvalidDevice {
                spec: s.to_string(),
                reason: "expected cpu, gpu or gpu:N".to_string(),
            }),
        }
    }
}

/// Resolve a spec to an ndarray (CPU) device.
///
/// # Errors
///
/// Any GPU request fails: the ndarray backend only runs on the host.
#[cfg(feature = "backend-ndarray")]
pub fn resolve_ndarray(spec: DeviceSpec) -> Result<burn_ndarray::NdArrayDevice> {
    match spec {
        DeviceSpec::Cpu => Ok(burn_ndarray::NdArrayDevice::Cpu),
        DeviceSpec::Gpu(_) => Err(CoreError::DeviceUnavailable(format!(
            "'{}' requested but the ndarray backend is CPU-only; rebuild with the \
             `backend-wgpu` feature or select cpu",
            spec
        ))),
    }
}

/// Resolve a spec to a wgpu device.
#[cfg(feature = "backend-wgpu")]
pub fn resolve_wgpu(spec: DeviceSpec) -> Result<burn_wgpu::WgpuDevice> {
    match spec {
        DeviceSpec::Cpu => Ok(burn_wgpu::WgpuDevice::Cpu),
        DeviceSpec::Gpu(None) => Ok(burn_wgpu::WgpuDevice::default()),
        DeviceSpec::Gpu(Some(index)) => Ok(burn_wgpu::WgpuDevice::DiscreteGpu(index)),
    }
}
