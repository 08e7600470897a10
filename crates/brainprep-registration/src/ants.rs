//! Registration through the ANTs command-line tools.
//!
//! Estimation runs `antsRegistrationSyNQuick.sh`; resampling through an
//! existing transform runs `antsApplyTransforms`. Tool output goes to the
//! per-step log file.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use brainprep_core::{
    Interpolation, PreprocessError, RegistrationRequest, Registrator, Result, RunContext, TransformRef,
    TransformRequest,
};
use brainprep_io::run_logged;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const SYN_QUICK: &str = "antsRegistrationSyNQuick.sh";
const APPLY_TRANSFORMS: &str = "antsApplyTransforms";

/// Transform model estimated by `antsRegistrationSyNQuick.sh`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntsTransformType {
    #[default]
    Rigid,
    Affine,
}

impl AntsTransformType {
    fn flag(&self) -> &'static str {
        match self {
            AntsTransformType::Rigid => "r",
            AntsTransformType::Affine => "a",
        }
    }
}

/// [`Registrator`] backed by ANTs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntsRegistrator {
    /// Directory holding the ANTs executables; `PATH` is searched if unset.
    pub bin_dir: Option<PathBuf>,
    pub transform_type: AntsTransformType,
    /// Use double precision instead of float.
    pub double_precision: bool,
    /// Match histograms before registration. Only sensible within a contrast.
    pub histogram_matching: bool,
}

impl Default for AntsRegistrator {
    fn default() -> Self {
        Self {
            bin_dir: None,
            transform_type: AntsTransformType::Rigid,
            double_precision: false,
            histogram_matching: false,
        }
    }
}

impl AntsRegistrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(bin_dir.into());
        self
    }

    pub fn with_transform_type(mut self, transform_type: AntsTransformType) -> Self {
        self.transform_type = transform_type;
        self
    }

    fn executable(&self, tool: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn registration_args(&self, request: &RegistrationRequest<'_>, ctx: &RunContext) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-d".into(),
            "3".into(),
            "-f".into(),
            request.fixed.path().into(),
            "-m".into(),
            request.moving.path().into(),
            "-o".into(),
            request.matrix.into(),
            "-t".into(),
            self.transform_type.flag().into(),
            "-p".into(),
            if self.double_precision { "d" } else { "f" }.into(),
            "-j".into(),
            if self.histogram_matching { "1" } else { "0" }.into(),
        ];
        if let Some(threads) = ctx.threads {
            args.push("-n".into());
            args.push(threads.to_string().into());
        }
        args
    }

    fn transform_args(request: &TransformRequest<'_>) -> Vec<OsString> {
        let interpolation = match request.interpolation {
            Interpolation::Linear => "Linear",
            Interpolation::NearestNeighbor => "NearestNeighbor",
        };
        vec![
            "-d".into(),
            "3".into(),
            "-i".into(),
            request.moving.path().into(),
            "-r".into(),
            request.fixed.path().into(),
            "-o".into(),
            request.output.into(),
            "-t".into(),
            request.transform.path().into(),
            "-n".into(),
            interpolation.into(),
        ]
    }

    fn run(&self, tool: &str, args: Vec<OsString>, log: &Path, ctx: &RunContext) -> Result<()> {
        let mut command = Command::new(self.executable(tool));
        command.args(args);
        ctx.apply_to(&mut command);
        run_logged(command, tool, log).map_err(|e| PreprocessError::registration(format!("{e:#}")))
    }
}

/// Paths `antsRegistrationSyNQuick.sh` derives from its output prefix.
fn prefixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl Registrator for AntsRegistrator {
    fn register(&self, request: &RegistrationRequest<'_>, ctx: &RunContext) -> Result<TransformRef> {
        info!("Registering {} onto {}", request.moving, request.fixed);
        self.run(SYN_QUICK, self.registration_args(request, ctx), request.log, ctx)?;

        let warped = prefixed(request.matrix, "Warped.nii.gz");
        fs::rename(&warped, request.output).map_err(|e| PreprocessError::io(&warped, e))?;

        let inverse = prefixed(request.matrix, "InverseWarped.nii.gz");
        if inverse.exists() {
            fs::remove_file(&inverse).map_err(|e| PreprocessError::io(&inverse, e))?;
        }

        let matrix = prefixed(request.matrix, "0GenericAffine.mat");
        if !matrix.is_file() {
            return Err(PreprocessError::registration(format!(
                "{SYN_QUICK} produced no transform at {}",
                matrix.display()
            )));
        }
        debug!("Transform written to {}", matrix.display());
        Ok(TransformRef::new(matrix))
    }

    fn transform(&self, request: &TransformRequest<'_>, ctx: &RunContext) -> Result<()> {
        debug!(
            "Applying {} to {} ({:?})",
            request.transform, request.moving, request.interpolation
        );
        self.run(APPLY_TRANSFORMS, Self::transform_args(request), request.log, ctx)?;
        if !request.output.is_file() {
            return Err(PreprocessError::registration(format!(
                "{APPLY_TRANSFORMS} produced no output at {}",
                request.output.display()
            )));
        }
        Ok(())
    }
}
