//! Device selection and memory introspection.
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};
use std::fmt;
use std::process::Command;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// A compute device, usable as part of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

#[derive(Debug, Error)]
#[error("unknown device `{0}`, expected auto, cpu, cuda[:N] or metal[:N]")]
pub struct DeviceParseError(pub String);

impl DeviceSpec {
    /// Pick the best available accelerator, falling back to the CPU.
    pub fn auto() -> Self {
        if cuda_is_available() {
            DeviceSpec::Cuda(0)
        } else if metal_is_available() {
            DeviceSpec::Metal(0)
        } else {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            info!("running on CPU, to run on GPU(metal) build with `--features metal`");
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            info!("running on CPU, to run on GPU build with `--features cuda`");
            DeviceSpec::Cpu
        }
    }

    pub fn to_device(&self) -> Result<Device> {
        match *self {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal),
            DeviceSpec::Metal(ordinal) => Device::new_metal(ordinal),
        }
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceSpec::Cpu)
    }
}

impl FromStr for DeviceSpec {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| DeviceParseError(s.to_string()))?;
                (kind, Some(ordinal))
            }
            None => (lowered.as_str(), None),
        };
        match (kind, ordinal) {
            ("auto", None) => Ok(DeviceSpec::auto()),
            ("cpu", None) => Ok(DeviceSpec::Cpu),
            ("cuda", ordinal) => Ok(DeviceSpec::Cuda(ordinal.unwrap_or(0))),
            ("metal", ordinal) => Ok(DeviceSpec::Metal(ordinal.unwrap_or(0))),
            _ => Err(DeviceParseError(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            DeviceSpec::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

/// What the batcher knows about the device it is sizing batches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: DeviceSpec,
    /// Free memory in bytes, `None` when it could not be determined.
    pub free_memory_bytes: Option<u64>,
}

impl DeviceInfo {
    pub fn unknown(device: DeviceSpec) -> Self {
        Self {
            device,
            free_memory_bytes: None,
        }
    }

    pub fn with_free_memory(device: DeviceSpec, bytes: u64) -> Self {
        Self {
            device,
            free_memory_bytes: Some(bytes),
        }
    }

    /// Query the device for free memory.
    ///
    /// Only CUDA devices are introspected (through `nvidia-smi`). The CPU and
    /// metal report nothing, which makes the batcher use its fixed default.
    pub fn probe(device: DeviceSpec) -> Self {
        let free_memory_bytes = match device {
            DeviceSpec::Cuda(ordinal) => query_cuda_free_memory(ordinal),
            DeviceSpec::Cpu | DeviceSpec::Metal(_) => None,
        };
        debug!(%device, ?free_memory_bytes, "probed device memory");
        Self {
            device,
            free_memory_bytes,
        }
    }
}

fn query_cuda_free_memory(ordinal: usize) -> Option<u64> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=memory.free",
            "--format=csv,noheader,nounits",
            &format!("--id={ordinal}"),
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_free_mib(&String::from_utf8_lossy(&output.stdout))
}

fn parse_free_mib(stdout: &str) -> Option<u64> {
    let mib = stdout.lines().next()?.trim().parse::<u64>().ok()?;
    Some(mib * 1024 * 1024)
}
