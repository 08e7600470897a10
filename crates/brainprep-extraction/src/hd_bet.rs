//! Brain extraction with the HD-BET command-line tool.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use brainprep_core::{
    ArtifactRef, BrainExtractor, ExtractionRequest, PreprocessError, ResolvedDevice, Result, RunContext,
};
use brainprep_io::run_logged;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mask::apply_mask_file;

const TOOL: &str = "hd-bet";

/// HD-BET inference mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdBetMode {
    /// Single network, suitable for CPU inference.
    Fast,
    /// Five-fold ensemble.
    #[default]
    Accurate,
}

impl HdBetMode {
    fn as_str(&self) -> &'static str {
        match self {
            HdBetMode::Fast => "fast",
            HdBetMode::Accurate => "accurate",
        }
    }
}

/// [`BrainExtractor`] running HD-BET for mask computation and applying
/// masks natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdBetExtractor {
    pub executable: PathBuf,
    pub mode: HdBetMode,
    /// Test-time augmentation.
    pub tta: bool,
}

impl Default for HdBetExtractor {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(TOOL),
            mode: HdBetMode::Accurate,
            tta: true,
        }
    }
}

impl HdBetExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_mode(mut self, mode: HdBetMode) -> Self {
        self.mode = mode;
        self
    }

    fn args(&self, request: &ExtractionRequest<'_>, ctx: &RunContext) -> Vec<OsString> {
        // CUDA_VISIBLE_DEVICES already narrows the visible GPUs to the
        // requested ones, so the first visible device is always right.
        let device = match ctx.device {
            ResolvedDevice::Cpu => "cpu",
            ResolvedDevice::Cuda { .. } => "0",
        };
        vec![
            "-i".into(),
            request.input.path().into(),
            "-o".into(),
            request.masked.into(),
            "-device".into(),
            device.into(),
            "-mode".into(),
            self.mode.as_str().into(),
            "-tta".into(),
            if self.tta { "1" } else { "0" }.into(),
            "-s".into(),
            "1".into(),
        ]
    }
}

/// Where HD-BET writes the mask for a given masked output.
fn default_mask_path(masked: &Path) -> PathBuf {
    let name = masked
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name);
    masked.with_file_name(format!("{stem}_mask.nii.gz"))
}

impl BrainExtractor for HdBetExtractor {
    fn extract(&self, request: &ExtractionRequest<'_>, ctx: &RunContext) -> Result<ArtifactRef> {
        info!("Extracting brain from {}", request.input);
        let mut command = Command::new(&self.executable);
        command.args(self.args(request, ctx));
        ctx.apply_to(&mut command);
        run_logged(command, TOOL, request.log)
            .map_err(|e| PreprocessError::brain_extraction(format!("{e:#}")))?;

        if !request.masked.is_file() {
            return Err(PreprocessError::brain_extraction(format!(
                "{TOOL} produced no masked image at {}",
                request.masked.display()
            )));
        }
        let produced = default_mask_path(request.masked);
        if produced != request.mask {
            fs::rename(&produced, request.mask).map_err(|e| PreprocessError::io(&produced, e))?;
        }
        if !request.mask.is_file() {
            return Err(PreprocessError::brain_extraction(format!(
                "{TOOL} produced no mask at {}",
                request.mask.display()
            )));
        }
        debug!("Brain mask written to {}", request.mask.display());
        Ok(ArtifactRef::new(request.mask))
    }

    fn apply_mask(
        &self,
        input: &ArtifactRef,
        mask: &ArtifactRef,
        output: &Path,
        _ctx: &RunContext,
    ) -> Result<()> {
        apply_mask_file(input.path(), mask.path(), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mask_path_follows_masked_name() {
        assert_eq!(
            default_mask_path(Path::new("/work/atlas_bet_t1c.nii.gz")),
            PathBuf::from("/work/atlas_bet_t1c_mask.nii.gz")
        );
    }

    #[test]
    fn test_device_flag_follows_context() {
        let input = ArtifactRef::new("/work/atlas__t1c.nii.gz");
        let request = ExtractionRequest {
            input: &input,
            masked: Path::new("/work/atlas_bet_t1c.nii.gz"),
            mask: Path::new("/work/atlas_bet_t1c_mask.nii.gz"),
            log: Path::new("/work/brain-extraction.log"),
        };
        let extractor = HdBetExtractor::new().with_mode(HdBetMode::Fast);

        let cpu: Vec<String> = extractor
            .args(&request, &RunContext::cpu())
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(cpu.windows(2).any(|w| w == ["-device", "cpu"]));
        assert!(cpu.windows(2).any(|w| w == ["-mode", "fast"]));

        let gpu = RunContext {
            device: ResolvedDevice::Cuda {
                visible_devices: Some("1".to_string()),
            },
            threads: None,
        };
        let gpu: Vec<String> = extractor
            .args(&request, &gpu)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(gpu.windows(2).any(|w| w == ["-device", "0"]));
    }

    #[test]
    fn test_missing_tool_is_brain_extraction_error() {
        let dir = tempdir().unwrap();
        let input = ArtifactRef::new(dir.path().join("t1c.nii.gz"));
        let extractor = HdBetExtractor::new().with_executable(dir.path().join("no-hd-bet"));
        let err = extractor
            .extract(
                &ExtractionRequest {
                    input: &input,
                    masked: &dir.path().join("bet.nii.gz"),
                    mask: &dir.path().join("bet_mask.nii.gz"),
                    log: &dir.path().join("bet.log"),
                },
                &RunContext::cpu(),
            )
            .unwrap_err();
        assert!(matches!(err, PreprocessError::BrainExtractionError(_)));
    }
}
