//! Per-run configuration passed explicitly into every collaborator call.
//!
//! Nothing here touches process-wide state: device selection is resolved once
//! per run into a [`RunContext`] and command-line collaborators apply it to
//! their child processes only.

use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Requested accelerator for long-running collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Use CUDA if `nvidia-smi` runs successfully, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda {
        /// Value for `CUDA_VISIBLE_DEVICES` in collaborator processes.
        #[serde(default)]
        visible_devices: Option<String>,
    },
}

impl DeviceSelection {
    /// Parse the short textual form used on the command line and in the
    /// environment: `auto`, `cpu`, `cuda` or `cuda:<ids>`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "auto" => Some(Self::Auto),
            "cpu" => Some(Self::Cpu),
            "cuda" | "gpu" => Some(Self::Cuda {
                visible_devices: None,
            }),
            _ => value.strip_prefix("cuda:").map(|ids| Self::Cuda {
                visible_devices: Some(ids.to_string()),
            }),
        }
    }
}

/// Serializable run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub device: DeviceSelection,
    /// Thread budget handed to collaborators that accept one.
    pub threads: Option<usize>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: DeviceSelection) -> Self {
        self.device = device;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Resolve the configuration into the context handed to collaborators.
    pub fn resolve(&self) -> RunContext {
        let device = match &self.device {
            DeviceSelection::Cpu => ResolvedDevice::Cpu,
            DeviceSelection::Cuda { visible_devices } => ResolvedDevice::Cuda {
                visible_devices: visible_devices.clone(),
            },
            DeviceSelection::Auto => {
                if cuda_is_available() {
                    ResolvedDevice::Cuda {
                        visible_devices: None,
                    }
                } else {
                    ResolvedDevice::Cpu
                }
            }
        };
        debug!("Resolved device: {:?}", device);
        RunContext {
            device,
            threads: self.threads,
        }
    }
}

/// Device after probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDevice {
    Cpu,
    Cuda { visible_devices: Option<String> },
}

impl ResolvedDevice {
    pub fn is_cuda(&self) -> bool {
        matches!(self, ResolvedDevice::Cuda { .. })
    }

    /// Environment a collaborator process needs to see this device.
    pub fn child_env(&self) -> Vec<(&'static str, String)> {
        match self {
            ResolvedDevice::Cpu => vec![("CUDA_VISIBLE_DEVICES", String::new())],
            ResolvedDevice::Cuda { visible_devices } => {
                let mut env = vec![("CUDA_DEVICE_ORDER", "PCI_BUS_ID".to_string())];
                if let Some(ids) = visible_devices {
                    env.push(("CUDA_VISIBLE_DEVICES", ids.clone()));
                }
                env
            }
        }
    }
}

/// Resolved per-run settings threaded into collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub device: ResolvedDevice,
    pub threads: Option<usize>,
}

impl RunContext {
    /// CPU-only context, without probing.
    pub fn cpu() -> Self {
        Self {
            device: ResolvedDevice::Cpu,
            threads: None,
        }
    }

    /// Apply device and thread settings to a collaborator command.
    pub fn apply_to(&self, command: &mut Command) {
        for (key, value) in self.device.child_env() {
            command.env(key, value);
        }
        if let Some(threads) = self.threads {
            command.env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", threads.to_string());
            command.env("OMP_NUM_THREADS", threads.to_string());
        }
    }
}

fn cuda_is_available() -> bool {
    Command::new("nvidia-smi")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!(DeviceSelection::parse("CPU"), Some(DeviceSelection::Cpu));
        assert_eq!(
            DeviceSelection::parse("cuda:0,1"),
            Some(DeviceSelection::Cuda {
                visible_devices: Some("0,1".to_string())
            })
        );
        assert_eq!(DeviceSelection::parse("tpu"), None);
    }

    #[test]
    fn test_explicit_devices_resolve_without_probing() {
        let ctx = RunConfig::new().with_device(DeviceSelection::Cpu).resolve();
        assert_eq!(ctx.device, ResolvedDevice::Cpu);

        let ctx = RunConfig::new()
            .with_device(DeviceSelection::Cuda {
                visible_devices: Some("1".to_string()),
            })
            .with_threads(4)
            .resolve();
        assert!(ctx.device.is_cuda());
        assert_eq!(ctx.threads, Some(4));
    }

    #[test]
    fn test_cuda_child_env() {
        let env = ResolvedDevice::Cuda {
            visible_devices: Some("0".to_string()),
        }
        .child_env();
        assert!(env.contains(&("CUDA_DEVICE_ORDER", "PCI_BUS_ID".to_string())));
        assert!(env.contains(&("CUDA_VISIBLE_DEVICES", "0".to_string())));
    }
}
