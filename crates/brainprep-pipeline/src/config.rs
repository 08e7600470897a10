//! Preprocessor configuration.
//!
//! Loading follows three tiers, later ones winning:
//! 1. TOML file
//! 2. `BRAINPREP_*` environment variables
//! 3. Command-line flags (applied by the caller)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use brainprep_core::{DeviceSelection, PreprocessError, Result, RunConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for one [`Preprocessor`](crate::Preprocessor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Template defining the target coordinate space.
    pub atlas_image: PathBuf,
    /// Parent directory for scratch workspaces; the system temp dir if unset.
    pub temp_root: Option<PathBuf>,
    /// Process moving modalities of a stage concurrently.
    pub parallel: bool,
    /// Leave the scratch workspace on disk after the run.
    pub keep_workspace: bool,
    pub run: RunConfig,
}

impl PreprocessorConfig {
    pub fn new(atlas_image: impl Into<PathBuf>) -> Self {
        Self {
            atlas_image: atlas_image.into(),
            ..Self::default()
        }
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(temp_root.into());
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    pub fn with_run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    /// Check values that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.atlas_image.as_os_str().is_empty() {
            return Err(PreprocessError::invalid_configuration("no atlas image configured"));
        }
        if self.run.threads == Some(0) {
            return Err(PreprocessError::invalid_configuration("thread count must be positive"));
        }
        Ok(())
    }
}

/// Load a configuration file and apply environment overrides.
pub fn load_config(path: &Path) -> Result<PreprocessorConfig> {
    let content = fs::read_to_string(path).map_err(|e| PreprocessError::io(path, e))?;
    let mut config: PreprocessorConfig = toml::from_str(&content).map_err(|e| {
        PreprocessError::invalid_configuration(format!("{}: {}", path.display(), e))
    })?;
    apply_environment_overrides(&mut config);
    Ok(config)
}

/// Apply `BRAINPREP_*` environment variables to `config`.
///
/// - `BRAINPREP_ATLAS` -> `atlas_image`
/// - `BRAINPREP_TEMP_DIR` -> `temp_root`
/// - `BRAINPREP_DEVICE` -> `run.device` (`auto`, `cpu`, `cuda`, `cuda:<ids>`)
/// - `BRAINPREP_CUDA_VISIBLE_DEVICES` -> visible GPUs, unless the device is `cpu`
/// - `BRAINPREP_THREADS` -> `run.threads`
/// - `BRAINPREP_PARALLEL` -> `parallel`
pub fn apply_environment_overrides(config: &mut PreprocessorConfig) {
    apply_overrides(config, |key| env::var(key).ok());
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides<F>(config: &mut PreprocessorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("BRAINPREP_ATLAS") {
        config.atlas_image = PathBuf::from(value);
    }
    if let Some(value) = lookup("BRAINPREP_TEMP_DIR") {
        config.temp_root = Some(PathBuf::from(value));
    }
    if let Some(value) = lookup("BRAINPREP_DEVICE") {
        match DeviceSelection::parse(&value) {
            Some(device) => config.run.device = device,
            None => warn!("Ignoring unknown BRAINPREP_DEVICE value {:?}", value),
        }
    }
    if let Some(value) = lookup("BRAINPREP_CUDA_VISIBLE_DEVICES") {
        if config.run.device != DeviceSelection::Cpu {
            config.run.device = DeviceSelection::Cuda {
                visible_devices: Some(value),
            };
        }
    }
    if let Some(value) = lookup("BRAINPREP_THREADS") {
        match value.parse::<usize>() {
            Ok(threads) => config.run.threads = Some(threads),
            Err(_) => warn!("Ignoring invalid BRAINPREP_THREADS value {:?}", value),
        }
    }
    if let Some(value) = lookup("BRAINPREP_PARALLEL") {
        let value = value.to_lowercase();
        config.parallel = value == "true" || value == "1" || value == "yes";
    }
}
