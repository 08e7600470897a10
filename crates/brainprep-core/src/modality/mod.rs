//! Per-modality preprocessing state.
//!
//! A [`Modality`] owns the artifact tracks of one imaging channel and the
//! operations that advance them. Modalities never talk to each other: the
//! orchestrator reads results (transforms, masks) from one modality and
//! passes them into another's operations.

mod builder;
mod outputs;

pub use builder::ModalityBuilder;
pub use outputs::{OutputPaths, OutputSlot, OutputVariant};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::artifact::{ensure_parent, ArtifactRef, ArtifactTrack, BinaryKind, Stage, TransformRef};
use crate::collaborators::{
    BrainExtractor, ExtractionRequest, Interpolation, Normalizer, RegistrationRequest, Registrator,
    TransformRequest, VolumeIo,
};
use crate::config::RunContext;
use crate::error::{PreprocessError, Result};

/// Where, and under which base name, a stage writes one artifact.
#[derive(Debug, Clone, Copy)]
pub struct StageOutput<'a> {
    pub stage: Stage,
    pub dir: &'a Path,
    pub name: &'a str,
}

impl<'a> StageOutput<'a> {
    pub fn new(stage: Stage, dir: &'a Path, name: &'a str) -> Self {
        Self { stage, dir, name }
    }

    pub fn volume_path(&self) -> PathBuf {
        ArtifactRef::in_dir(self.dir, self.name).path().to_path_buf()
    }

    /// Matrix location without extension; backends append their own.
    pub fn matrix_path(&self) -> PathBuf {
        self.dir.join(self.name)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }
}

/// One imaging channel of an exam.
#[derive(Debug, Clone)]
pub struct Modality {
    name: String,
    image: ArtifactTrack,
    roi: Option<ArtifactTrack>,
    biopsy: Option<ArtifactTrack>,
    outputs: OutputPaths,
    normalizer: Option<Arc<dyn Normalizer>>,
    atlas_correction: bool,
}

impl Modality {
    /// Start building a modality from its name and original image.
    pub fn builder(name: impl Into<String>, image: impl Into<PathBuf>) -> ModalityBuilder {
        ModalityBuilder::new(name, image)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original_image(&self) -> &ArtifactRef {
        self.image.original()
    }

    pub fn original_binary(&self, kind: BinaryKind) -> Option<&ArtifactRef> {
        self.binary_track(kind).map(ArtifactTrack::original)
    }

    pub fn current_image(&self) -> &ArtifactRef {
        self.image.current()
    }

    pub fn current_binary(&self, kind: BinaryKind) -> Option<&ArtifactRef> {
        self.binary_track(kind).map(ArtifactTrack::current)
    }

    pub fn current_roi(&self) -> Option<&ArtifactRef> {
        self.current_binary(BinaryKind::Roi)
    }

    pub fn current_biopsy(&self) -> Option<&ArtifactRef> {
        self.current_binary(BinaryKind::Biopsy)
    }

    pub fn image_track(&self) -> &ArtifactTrack {
        &self.image
    }

    pub fn binary_track(&self, kind: BinaryKind) -> Option<&ArtifactTrack> {
        match kind {
            BinaryKind::Roi => self.roi.as_ref(),
            BinaryKind::Biopsy => self.biopsy.as_ref(),
        }
    }

    pub fn has_binary(&self, kind: BinaryKind) -> bool {
        self.binary_track(kind).is_some()
    }

    /// Label volumes this modality carries, ROI first.
    pub fn binaries(&self) -> impl Iterator<Item = BinaryKind> + '_ {
        BinaryKind::ALL.into_iter().filter(|kind| self.has_binary(*kind))
    }

    /// Base name used for this modality's label volumes, e.g. `t1c_roi`.
    pub fn binary_name(&self, kind: BinaryKind) -> String {
        format!("{}_{}", self.name, kind)
    }

    pub fn outputs(&self) -> &OutputPaths {
        &self.outputs
    }

    pub fn normalizer(&self) -> Option<&Arc<dyn Normalizer>> {
        self.normalizer.as_ref()
    }

    pub fn atlas_correction(&self) -> bool {
        self.atlas_correction
    }

    /// True iff a skull-stripped output is configured.
    pub fn requires_brain_extraction(&self) -> bool {
        self.outputs.any_skull_stripped()
    }

    fn binary_track_mut(&mut self, kind: BinaryKind) -> Result<&mut ArtifactTrack> {
        let track = match kind {
            BinaryKind::Roi => self.roi.as_mut(),
            BinaryKind::Biopsy => self.biopsy.as_mut(),
        };
        track.ok_or_else(|| PreprocessError::MissingBinary {
            modality: self.name.clone(),
            kind,
        })
    }

    fn require_binary(&self, kind: BinaryKind) -> Result<&ArtifactRef> {
        self.current_binary(kind)
            .ok_or_else(|| PreprocessError::MissingBinary {
                modality: self.name.clone(),
                kind,
            })
    }

    /// Estimate a transform from the current image onto `fixed` and advance
    /// the current image to the resampled result.
    pub fn register(
        &mut self,
        registrator: &dyn Registrator,
        fixed: &ArtifactRef,
        out: StageOutput<'_>,
        ctx: &RunContext,
    ) -> Result<TransformRef> {
        let output = out.volume_path();
        let matrix = out.matrix_path();
        let log = out.log_path();
        debug!("Registering {} onto {}", self.image.current(), fixed);

        let transform = registrator.register(
            &RegistrationRequest {
                fixed,
                moving: self.image.current(),
                output: &output,
                matrix: &matrix,
                log: &log,
            },
            ctx,
        )?;
        self.image
            .advance(out.stage, ArtifactRef::new(output), Some(transform.clone()));
        Ok(transform)
    }

    /// Resample the current image through an existing transform.
    pub fn transform(
        &mut self,
        registrator: &dyn Registrator,
        fixed: &ArtifactRef,
        out: StageOutput<'_>,
        transform: &TransformRef,
        ctx: &RunContext,
    ) -> Result<()> {
        let output = out.volume_path();
        let log = out.log_path();
        registrator.transform(
            &TransformRequest {
                fixed,
                moving: self.image.current(),
                output: &output,
                transform,
                log: &log,
                interpolation: Interpolation::Linear,
            },
            ctx,
        )?;
        self.image
            .advance(out.stage, ArtifactRef::new(output), Some(transform.clone()));
        Ok(())
    }

    /// Resample the current ROI or biopsy through an existing transform with
    /// nearest-neighbour interpolation.
    pub fn transform_binary(
        &mut self,
        registrator: &dyn Registrator,
        fixed: &ArtifactRef,
        out: StageOutput<'_>,
        transform: &TransformRef,
        kind: BinaryKind,
        ctx: &RunContext,
    ) -> Result<()> {
        let output = out.volume_path();
        let log = out.log_path();
        let track = self.binary_track_mut(kind)?;
        registrator.transform(
            &TransformRequest {
                fixed,
                moving: track.current(),
                output: &output,
                transform,
                log: &log,
                interpolation: Interpolation::NearestNeighbor,
            },
            ctx,
        )?;
        track.advance(out.stage, ArtifactRef::new(output), Some(transform.clone()));
        Ok(())
    }

    /// Compute a brain mask from the current image.
    ///
    /// The current image only advances to the masked result when this
    /// modality has a skull-stripped output; the mask is returned either way.
    pub fn extract_brain_region(
        &mut self,
        extractor: &dyn BrainExtractor,
        output_dir: &Path,
        ctx: &RunContext,
    ) -> Result<ArtifactRef> {
        let masked = ArtifactRef::in_dir(output_dir, &format!("atlas_bet_{}", self.name));
        let mask = ArtifactRef::in_dir(output_dir, &format!("atlas_bet_{}_mask", self.name));
        let log = output_dir.join("brain-extraction.log");

        let mask = extractor.extract(
            &ExtractionRequest {
                input: self.image.current(),
                masked: masked.path(),
                mask: mask.path(),
                log: &log,
            },
            ctx,
        )?;
        if self.requires_brain_extraction() {
            self.image.advance(Stage::BrainExtraction, masked, None);
        }
        Ok(mask)
    }

    /// Apply a mask computed on another modality. No-op unless this modality
    /// has a skull-stripped output.
    pub fn apply_mask(
        &mut self,
        extractor: &dyn BrainExtractor,
        mask: &ArtifactRef,
        output_dir: &Path,
        ctx: &RunContext,
    ) -> Result<()> {
        if !self.requires_brain_extraction() {
            debug!("{} has no skull-stripped output, mask not applied", self.name);
            return Ok(());
        }
        let masked = ArtifactRef::in_dir(output_dir, &format!("brain_masked__{}", self.name));
        extractor.apply_mask(self.image.current(), mask, masked.path(), ctx)?;
        self.image.advance(Stage::BrainExtraction, masked, None);
        Ok(())
    }

    /// Copy the current image and labels into `dir` as `<prefix>__<name>`
    /// and record the copies under `stage`. No resampling happens, so each
    /// copy keeps the transform of the artifact it was taken from.
    pub fn carry_forward(&mut self, stage: Stage, dir: &Path, prefix: &str) -> Result<()> {
        let image = ArtifactRef::in_dir(dir, &format!("{prefix}__{}", self.name));
        self.image.current().copy_to(image.path())?;
        let transform = self.image.latest().transform.clone();
        self.image.advance(stage, image, transform);

        let kinds: Vec<BinaryKind> = self.binaries().collect();
        for kind in kinds {
            let target = ArtifactRef::in_dir(dir, &format!("{prefix}__{}", self.binary_name(kind)));
            let track = self.binary_track_mut(kind)?;
            track.current().copy_to(target.path())?;
            let transform = track.latest().transform.clone();
            track.advance(stage, target, transform);
        }
        Ok(())
    }

    /// Back up the current image and replace it with its normalized version.
    ///
    /// Backups go to `scratch_dir/unnormalized/` and, if given, to
    /// `backup_dir`. Without a normalizer only the backups are written.
    pub fn normalize_in_place(
        &mut self,
        io: &dyn VolumeIo,
        scratch_dir: &Path,
        backup_dir: Option<&Path>,
    ) -> Result<()> {
        let backup_name = format!("unnormalized__{}.nii.gz", self.name);
        if let Some(dir) = backup_dir {
            self.image.current().copy_to(&dir.join(&backup_name))?;
        }
        self.image
            .current()
            .copy_to(&scratch_dir.join("unnormalized").join(&backup_name))?;

        let Some(normalizer) = self.normalizer.as_ref() else {
            return Ok(());
        };
        let current = self.image.current().clone();
        let normalized = normalizer.normalize(&io.read(current.path())?)?;
        let output = ArtifactRef::in_dir(
            scratch_dir,
            &format!("{}__{}", Stage::Normalization.file_prefix(), self.name),
        );
        ensure_parent(output.path())?;
        io.write(&normalized, output.path(), current.path())?;
        self.image.advance(Stage::Normalization, output, None);
        Ok(())
    }

    /// Materialize the current image at `destination`, normalizing on the
    /// fly if requested. The current image itself is never modified.
    pub fn save_image(&self, io: &dyn VolumeIo, destination: &Path, normalize: bool) -> Result<()> {
        let current = self.image.current();
        if !normalize {
            current.copy_to(destination)?;
            return Ok(());
        }
        let normalizer = self.normalizer.as_ref().ok_or_else(|| {
            PreprocessError::invalid_configuration(format!(
                "modality {} has no normalizer for {}",
                self.name,
                destination.display()
            ))
        })?;
        let normalized = normalizer.normalize(&io.read(current.path())?)?;
        ensure_parent(destination)?;
        io.write(&normalized, destination, current.path())
    }

    /// Materialize the current ROI or biopsy at `destination`.
    ///
    /// Label values are never normalized: with `normalize` set the volume is
    /// re-encoded through the codec with its values untouched.
    pub fn save_binary(
        &self,
        io: &dyn VolumeIo,
        destination: &Path,
        normalize: bool,
        kind: BinaryKind,
    ) -> Result<()> {
        let current = self.require_binary(kind)?;
        if !normalize {
            current.copy_to(destination)?;
            return Ok(());
        }
        let labels = io.read(current.path())?;
        ensure_parent(destination)?;
        io.write(&labels, destination, current.path())
    }
}
