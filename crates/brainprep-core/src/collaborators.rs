//! Contracts for the external collaborators driven by modalities.
//!
//! Registration, brain extraction, normalization and the volume codec are
//! implemented elsewhere; the core only sequences them. All collaborators are
//! `Send + Sync` so per-modality loops may run in parallel.

use std::fmt;
use std::path::Path;

use ndarray::ArrayD;

use crate::artifact::{ArtifactRef, TransformRef};
use crate::config::RunContext;
use crate::error::Result;

/// In-memory voxel data.
pub type VolumeData = ArrayD<f32>;

/// Interpolation used when resampling through an existing transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Smooth interpolation for intensity images.
    Linear,
    /// Label-preserving interpolation for binary volumes.
    NearestNeighbor,
}

impl Interpolation {
    pub fn is_binary(&self) -> bool {
        matches!(self, Interpolation::NearestNeighbor)
    }
}

/// Inputs and outputs of a transform estimation.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationRequest<'a> {
    pub fixed: &'a ArtifactRef,
    pub moving: &'a ArtifactRef,
    /// Resampled moving image.
    pub output: &'a Path,
    /// Location (or prefix) for the estimated transform.
    pub matrix: &'a Path,
    pub log: &'a Path,
}

/// Inputs and outputs of applying an existing transform.
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Reference grid for the output.
    pub fixed: &'a ArtifactRef,
    pub moving: &'a ArtifactRef,
    pub output: &'a Path,
    pub transform: &'a TransformRef,
    pub log: &'a Path,
    pub interpolation: Interpolation,
}

/// Inputs and outputs of brain extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub input: &'a ArtifactRef,
    pub masked: &'a Path,
    pub mask: &'a Path,
    pub log: &'a Path,
}

/// Estimates and applies spatial transforms.
pub trait Registrator: Send + Sync {
    /// Estimate a transform mapping `moving` onto `fixed`, write the
    /// resampled image and return a handle to the transform.
    fn register(&self, request: &RegistrationRequest<'_>, ctx: &RunContext) -> Result<TransformRef>;

    /// Resample `moving` through an existing transform.
    fn transform(&self, request: &TransformRequest<'_>, ctx: &RunContext) -> Result<()>;
}

/// Computes and applies binary brain masks.
pub trait BrainExtractor: Send + Sync {
    /// Compute a brain mask for the input, writing both the masked image and
    /// the mask. Returns the mask handle.
    fn extract(&self, request: &ExtractionRequest<'_>, ctx: &RunContext) -> Result<ArtifactRef>;

    /// Apply an existing mask to `input`, writing the result to `output`.
    fn apply_mask(
        &self,
        input: &ArtifactRef,
        mask: &ArtifactRef,
        output: &Path,
        ctx: &RunContext,
    ) -> Result<()>;
}

/// Pure intensity normalization over in-memory voxel data.
pub trait Normalizer: Send + Sync + fmt::Debug {
    fn normalize(&self, image: &VolumeData) -> Result<VolumeData>;
}

/// Volume codec.
pub trait VolumeIo: Send + Sync {
    fn read(&self, path: &Path) -> Result<VolumeData>;

    /// Write `data` to `path`, reusing header and geometry from `reference`.
    fn write(&self, data: &VolumeData, path: &Path, reference: &Path) -> Result<()>;
}
