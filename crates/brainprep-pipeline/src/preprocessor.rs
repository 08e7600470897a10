//! The four-stage preprocessing orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use brainprep_core::{
    ArtifactKind, ArtifactRef, BinaryKind, BrainExtractor, Exam, Modality, OutputVariant, PreprocessError,
    Registrator, Result, RunContext, Stage, StageOutput, TransformRef, VolumeIo,
};
use brainprep_io::copy_tree;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::PreprocessorConfig;
use crate::progress::{PipelineObserver, TracingObserver};
use crate::report::{RunReport, StageOutcome};
use crate::workspace::Workspace;

/// Durable directories receiving a merged copy of each stage's scratch
/// outputs. Stages without a directory are not copied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveDirs {
    pub coregistration: Option<PathBuf>,
    pub atlas_registration: Option<PathBuf>,
    pub atlas_correction: Option<PathBuf>,
    pub brain_extraction: Option<PathBuf>,
}

impl SaveDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage, dir: impl Into<PathBuf>) -> Self {
        let dir = Some(dir.into());
        match stage {
            Stage::Coregistration => self.coregistration = dir,
            Stage::AtlasRegistration => self.atlas_registration = dir,
            Stage::AtlasCorrection => self.atlas_correction = dir,
            Stage::BrainExtraction => self.brain_extraction = dir,
            Stage::Input | Stage::Normalization => {
                debug!("No save directory for {} artifacts", stage);
            }
        }
        self
    }

    pub fn for_stage(&self, stage: Stage) -> Option<&Path> {
        match stage {
            Stage::Coregistration => self.coregistration.as_deref(),
            Stage::AtlasRegistration => self.atlas_registration.as_deref(),
            Stage::AtlasCorrection => self.atlas_correction.as_deref(),
            Stage::BrainExtraction => self.brain_extraction.as_deref(),
            Stage::Input | Stage::Normalization => None,
        }
    }
}

/// Drives exams through coregistration, atlas registration, atlas
/// correction and brain extraction.
pub struct Preprocessor {
    registrator: Arc<dyn Registrator>,
    extractor: Arc<dyn BrainExtractor>,
    io: Arc<dyn VolumeIo>,
    config: PreprocessorConfig,
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl Preprocessor {
    /// Create a preprocessor logging its progress through `tracing`.
    pub fn new(
        registrator: Arc<dyn Registrator>,
        extractor: Arc<dyn BrainExtractor>,
        io: Arc<dyn VolumeIo>,
        config: PreprocessorConfig,
    ) -> Self {
        Self {
            registrator,
            extractor,
            io,
            config,
            observers: vec![Arc::new(TracingObserver)],
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Run all stages on `exam`, writing every configured output.
    ///
    /// Each modality's artifact table records what every stage produced, so
    /// the exam can be inspected afterwards. The scratch workspace is removed
    /// before this returns, on success and on failure alike, unless the
    /// configuration keeps it.
    pub fn run(&self, exam: &mut Exam, save: &SaveDirs) -> Result<RunReport> {
        self.config.validate()?;
        if !self.config.atlas_image.is_file() {
            return Err(PreprocessError::invalid_configuration(format!(
                "atlas image {} does not exist",
                self.config.atlas_image.display()
            )));
        }
        let ctx = self.config.run.resolve();
        let workspace = Workspace::create(self.config.temp_root.as_deref(), self.config.keep_workspace)?;
        let atlas = ArtifactRef::new(self.config.atlas_image.clone());

        let moving: Vec<String> = exam.moving().iter().map(|m| m.name().to_string()).collect();
        self.notify(|o| o.on_run_start(exam.center().name(), &moving));

        let mut report = RunReport::default();

        self.stage(Stage::Coregistration, &mut report, || {
            self.coregister(exam, &workspace, &ctx, save)
        })?;
        self.stage(Stage::AtlasRegistration, &mut report, || {
            self.register_to_atlas(exam, &atlas, &workspace, &ctx, save)
        })?;
        self.stage(Stage::AtlasCorrection, &mut report, || {
            self.correct_atlas(exam, &workspace, &ctx, save)
        })?;

        info!("Saving non skull-stripped images...");
        self.materialize(exam, OutputVariant::SKULL, &mut report)
            .map_err(|e| self.fail(Stage::AtlasCorrection, e))?;

        if exam.requires_brain_extraction() {
            self.stage(Stage::BrainExtraction, &mut report, || {
                self.extract_brain(exam, &workspace, &ctx, save)
            })?;
        } else {
            self.notify(|o| o.on_stage_skipped(Stage::BrainExtraction, "No modality requests a skull-stripped output"));
            report.record_stage(Stage::BrainExtraction, StageOutcome::Skipped);
        }

        info!("Saving skull-stripped images...");
        self.materialize(exam, OutputVariant::BET, &mut report)
            .map_err(|e| self.fail(Stage::BrainExtraction, e))?;

        if workspace.is_kept() {
            report.workspace = Some(workspace.root().to_path_buf());
        }
        self.notify(|o| o.on_run_complete(&report));
        Ok(report)
    }

    /// Register every moving modality onto the center and carry its labels
    /// along with the same transform. The center keeps its frame.
    fn coregister(&self, exam: &mut Exam, workspace: &Workspace, ctx: &RunContext, save: &SaveDirs) -> Result<()> {
        let stage = Stage::Coregistration;
        let dir = workspace.stage_dir(stage)?;
        let (center, moving) = exam.split_mut();
        let fixed = center.current_image().clone();
        let prefix = format!("{}__{}__", stage.file_prefix(), center.name());

        info!("Coregistering {} moving modalities to center modality...", moving.len());
        self.for_each_moving(moving, |m| {
            let name = format!("{prefix}{}", m.name());
            info!("Registering modality {} (file={}) to center modality...", m.name(), name);
            let transform = m.register(
                self.registrator.as_ref(),
                &fixed,
                StageOutput::new(stage, &dir, &name),
                ctx,
            )?;
            self.transform_binaries(m, stage, &dir, &prefix, &transform, ctx)
        })?;

        center.carry_forward(stage, &dir, stage.file_prefix())?;
        save_stage(stage, &dir, save)
    }

    /// Register the center onto the atlas once and reuse that transform for
    /// every moving modality, which already shares the center's frame.
    fn register_to_atlas(
        &self,
        exam: &mut Exam,
        atlas: &ArtifactRef,
        workspace: &Workspace,
        ctx: &RunContext,
        save: &SaveDirs,
    ) -> Result<()> {
        let stage = Stage::AtlasRegistration;
        let dir = workspace.stage_dir(stage)?;
        let (center, moving) = exam.split_mut();
        let prefix = format!("{}__", stage.file_prefix());

        info!("Registering center modality to atlas...");
        let name = format!("{prefix}{}", center.name());
        let transform = center.register(
            self.registrator.as_ref(),
            atlas,
            StageOutput::new(stage, &dir, &name),
            ctx,
        )?;
        self.transform_binaries(center, stage, &dir, &prefix, &transform, ctx)?;

        let fixed = center.current_image().clone();
        info!("Transforming {} moving modalities to atlas space...", moving.len());
        self.for_each_moving(moving, |m| {
            let name = format!("{prefix}{}", m.name());
            debug!("Transforming modality {} (file={}) to atlas space...", m.name(), name);
            m.transform(
                self.registrator.as_ref(),
                &fixed,
                StageOutput::new(stage, &dir, &name),
                &transform,
                ctx,
            )?;
            self.transform_binaries(m, stage, &dir, &prefix, &transform, ctx)
        })?;

        save_stage(stage, &dir, save)
    }

    /// Re-register atlas-space moving modalities directly onto the
    /// atlas-space center to undo the error of two chained resamplings.
    fn correct_atlas(&self, exam: &mut Exam, workspace: &Workspace, ctx: &RunContext, save: &SaveDirs) -> Result<()> {
        let stage = Stage::AtlasCorrection;
        let dir = workspace.stage_dir(stage)?;
        let (center, moving) = exam.split_mut();
        let fixed = center.current_image().clone();
        let prefix = format!("{}__{}__", stage.file_prefix(), center.name());

        self.for_each_moving(moving, |m| {
            if !m.atlas_correction() {
                info!("Skipping optional atlas correction for modality {}", m.name());
                return Ok(());
            }
            info!("Applying optional atlas correction for modality {}", m.name());
            let name = format!("{prefix}{}", m.name());
            let transform = m.register(
                self.registrator.as_ref(),
                &fixed,
                StageOutput::new(stage, &dir, &name),
                ctx,
            )?;
            self.transform_binaries(m, stage, &dir, &prefix, &transform, ctx)
        })?;

        center.carry_forward(stage, &dir, stage.file_prefix())?;
        save_stage(stage, &dir, save)
    }

    /// Compute one brain mask on the center and apply it to every moving
    /// modality.
    fn extract_brain(&self, exam: &mut Exam, workspace: &Workspace, ctx: &RunContext, save: &SaveDirs) -> Result<()> {
        let stage = Stage::BrainExtraction;
        let dir = workspace.stage_dir(stage)?;
        let masked_dir = workspace.brain_masked_dir()?;
        let (center, moving) = exam.split_mut();

        info!("Extracting brain region for center modality...");
        let mask = center.extract_brain_region(self.extractor.as_ref(), &dir, ctx)?;
        self.for_each_moving(moving, |m| {
            info!("Applying brain mask to {}...", m.name());
            m.apply_mask(self.extractor.as_ref(), &mask, &masked_dir, ctx)
        })?;

        save_stage(stage, &dir, save)
    }

    /// Resample every label volume of `modality` through `transform`, on
    /// the grid of its freshly resampled image.
    fn transform_binaries(
        &self,
        modality: &mut Modality,
        stage: Stage,
        dir: &Path,
        prefix: &str,
        transform: &TransformRef,
        ctx: &RunContext,
    ) -> Result<()> {
        let kinds: Vec<BinaryKind> = modality.binaries().collect();
        let fixed = modality.current_image().clone();
        for kind in kinds {
            let name = format!("{prefix}{}", modality.binary_name(kind));
            debug!("Transforming {} (file={})", modality.binary_name(kind), name);
            modality.transform_binary(
                self.registrator.as_ref(),
                &fixed,
                StageOutput::new(stage, dir, &name),
                transform,
                kind,
                ctx,
            )?;
        }
        Ok(())
    }

    /// Write the configured outputs of `variants` for every modality.
    fn materialize(&self, exam: &Exam, variants: [OutputVariant; 2], report: &mut RunReport) -> Result<()> {
        for modality in exam.modalities() {
            for variant in variants {
                let Some(slot) = modality.outputs().get(variant) else {
                    continue;
                };
                let normalize = variant.is_normalized();
                modality.save_image(self.io.as_ref(), &slot.image, normalize)?;
                report.record_output(modality.name(), variant, ArtifactKind::Image, &slot.image);

                for kind in BinaryKind::ALL {
                    if !modality.has_binary(kind) {
                        continue;
                    }
                    match slot.binary(kind) {
                        Some(path) => {
                            modality.save_binary(self.io.as_ref(), path, normalize, kind)?;
                            report.record_output(modality.name(), variant, ArtifactKind::Binary(kind), path);
                        }
                        None => debug!("No {} {} path for {}, not saved", variant, kind, modality.name()),
                    }
                }
            }
        }
        Ok(())
    }

    fn for_each_moving<F>(&self, moving: &mut [Modality], f: F) -> Result<()>
    where
        F: Fn(&mut Modality) -> Result<()> + Send + Sync,
    {
        if self.config.parallel {
            moving.par_iter_mut().try_for_each(|m| f(m))
        } else {
            moving.iter_mut().try_for_each(f)
        }
    }

    fn stage<F>(&self, stage: Stage, report: &mut RunReport, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.notify(|o| o.on_stage_start(stage));
        let start = Instant::now();
        f().map_err(|e| self.fail(stage, e))?;
        let elapsed = start.elapsed();
        self.notify(|o| o.on_stage_complete(stage, elapsed));
        report.record_stage(stage, StageOutcome::Completed { elapsed });
        Ok(())
    }

    fn fail(&self, stage: Stage, error: PreprocessError) -> PreprocessError {
        self.notify(|o| o.on_error(stage, &error));
        error
    }

    fn notify<F>(&self, f: F)
    where
        F: Fn(&dyn PipelineObserver),
    {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }
}

fn save_stage(stage: Stage, dir: &Path, save: &SaveDirs) -> Result<()> {
    let Some(destination) = save.for_stage(stage) else {
        return Ok(());
    };
    copy_tree(dir, destination).map_err(|e| {
        PreprocessError::io(destination, std::io::Error::other(format!("{e:#}")))
    })?;
    info!("{} output saved to {}", stage, destination.display());
    Ok(())
}
