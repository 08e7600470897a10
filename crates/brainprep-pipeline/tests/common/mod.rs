//! Stub collaborators and fixtures shared by the pipeline tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use brainprep_core::{
    ArtifactRef, BrainExtractor, DeviceSelection, ExtractionRequest, Interpolation, PreprocessError,
    RegistrationRequest, Registrator, Result, RunConfig, RunContext, TransformRef, TransformRequest,
};
use brainprep_pipeline::PreprocessorConfig;
use ndarray::Array3;
use nifti::writer::WriterOptions;

#[derive(Debug, Clone)]
pub struct RegistrationCall {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub output: PathBuf,
    pub transform: TransformRef,
}

#[derive(Debug, Clone)]
pub struct TransformCall {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub output: PathBuf,
    pub transform: TransformRef,
    pub interpolation: Interpolation,
}

/// Registrator copying volumes unchanged and recording every call. Each
/// estimated transform is a distinct file.
#[derive(Debug, Default)]
pub struct StubRegistrator {
    pub registrations: Mutex<Vec<RegistrationCall>>,
    pub transforms: Mutex<Vec<TransformCall>>,
    counter: AtomicUsize,
    fail: bool,
}

impl StubRegistrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registrator whose every estimation fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn registrations(&self) -> Vec<RegistrationCall> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn transforms(&self) -> Vec<TransformCall> {
        self.transforms.lock().unwrap().clone()
    }
}

impl Registrator for StubRegistrator {
    fn register(&self, request: &RegistrationRequest<'_>, _ctx: &RunContext) -> Result<TransformRef> {
        if self.fail {
            return Err(PreprocessError::registration("did not converge"));
        }
        request.moving.copy_to(request.output)?;
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let matrix = PathBuf::from(format!("{}.mat", request.matrix.display()));
        fs::write(&matrix, format!("transform {id}")).map_err(|e| PreprocessError::io(&matrix, e))?;
        let transform = TransformRef::new(matrix);
        self.registrations.lock().unwrap().push(RegistrationCall {
            fixed: request.fixed.path().to_path_buf(),
            moving: request.moving.path().to_path_buf(),
            output: request.output.to_path_buf(),
            transform: transform.clone(),
        });
        Ok(transform)
    }

    fn transform(&self, request: &TransformRequest<'_>, _ctx: &RunContext) -> Result<()> {
        request.moving.copy_to(request.output)?;
        self.transforms.lock().unwrap().push(TransformCall {
            fixed: request.fixed.path().to_path_buf(),
            moving: request.moving.path().to_path_buf(),
            output: request.output.to_path_buf(),
            transform: request.transform.clone(),
            interpolation: request.interpolation,
        });
        Ok(())
    }
}

/// Brain extractor counting its calls; masking is a plain copy.
#[derive(Debug, Default)]
pub struct StubExtractor {
    pub extract_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

impl BrainExtractor for StubExtractor {
    fn extract(&self, request: &ExtractionRequest<'_>, _ctx: &RunContext) -> Result<ArtifactRef> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        request.input.copy_to(request.masked)?;
        request.input.copy_to(request.mask)
    }

    fn apply_mask(
        &self,
        input: &ArtifactRef,
        _mask: &ArtifactRef,
        output: &Path,
        _ctx: &RunContext,
    ) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        input.copy_to(output)?;
        Ok(())
    }
}

/// Write a 2x2x2 volume.
pub fn write_volume(path: &Path, values: [f32; 8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let array = Array3::from_shape_vec((2, 2, 2), values.to_vec()).unwrap();
    WriterOptions::new(path).write_nifti(&array).unwrap();
}

pub fn write_image(path: &Path) {
    write_volume(path, [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0]);
}

pub fn write_label(path: &Path) {
    write_volume(path, [0.0, 0.0, 1.0, 1.0, 0.0, 2.0, 0.0, 0.0]);
}

/// CPU-only configuration with scratch workspaces under `root/scratch`.
pub fn config(root: &Path, atlas: &Path) -> PreprocessorConfig {
    PreprocessorConfig::new(atlas)
        .with_temp_root(root.join("scratch"))
        .with_run(RunConfig::new().with_device(DeviceSelection::Cpu))
}

/// Number of entries directly inside `dir`.
pub fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
