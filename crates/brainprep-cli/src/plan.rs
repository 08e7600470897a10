//! Output layout for a discovered exam.
//!
//! Everything is written below `<exam>/<exam>_brainprep/`:
//! one directory per requested output variant plus one per stage save dir.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use brainprep_core::{BinaryKind, Exam, Modality, Normalizer, OutputSlot, OutputVariant, Result, Stage};
use brainprep_pipeline::SaveDirs;

use crate::discover::{DiscoveredModality, ExamInputs};

/// Which output variants to request for every modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub raw: bool,
    pub normalized: bool,
    /// Also write skull-present variants.
    pub skull: bool,
}

impl OutputOptions {
    pub fn variants(&self) -> Vec<OutputVariant> {
        OutputVariant::ALL
            .into_iter()
            .filter(|v| if v.is_normalized() { self.normalized } else { self.raw })
            .filter(|v| v.is_skull_stripped() || self.skull)
            .collect()
    }
}

pub fn output_root(inputs: &ExamInputs) -> PathBuf {
    inputs.dir.join(format!("{}_brainprep", inputs.id))
}

pub fn save_dirs(inputs: &ExamInputs) -> SaveDirs {
    let root = output_root(inputs);
    SaveDirs::new()
        .with(Stage::Coregistration, root.join("co-registration"))
        .with(Stage::AtlasRegistration, root.join("atlas-registration"))
        .with(Stage::AtlasCorrection, root.join("atlas-correction"))
        .with(Stage::BrainExtraction, root.join("brain-extraction"))
}

fn output_slot(root: &Path, id: &str, modality: &DiscoveredModality, variant: OutputVariant) -> OutputSlot {
    let dir = root.join(variant.to_string());
    let suffix = if variant.is_skull_stripped() { "bet" } else { "skull" };
    let file = |label: &str| dir.join(format!("{id}_{}{label}_{suffix}.nii.gz", modality.name));

    let mut slot = OutputSlot::new(file(""));
    for kind in BinaryKind::ALL {
        if modality.binary(kind).is_some() {
            let path = file(&format!("_{kind}"));
            slot = match kind {
                BinaryKind::Roi => slot.with_roi(path),
                BinaryKind::Biopsy => slot.with_biopsy(path),
            };
        }
    }
    slot
}

fn build_modality(
    root: &Path,
    id: &str,
    modality: &DiscoveredModality,
    options: &OutputOptions,
    normalizer: &Arc<dyn Normalizer>,
) -> Result<Modality> {
    let mut builder = Modality::builder(modality.name.as_str(), &modality.image)
        .normalizer(normalizer.clone())
        .atlas_correction(true);
    for kind in BinaryKind::ALL {
        if let Some(path) = modality.binary(kind) {
            builder = builder.binary(kind, path);
        }
    }
    for variant in options.variants() {
        builder = builder.output(variant, output_slot(root, id, modality, variant));
    }
    builder.build()
}

/// Build the exam for `inputs` with the requested outputs.
pub fn build_exam(inputs: &ExamInputs, options: &OutputOptions, normalizer: Arc<dyn Normalizer>) -> Result<Exam> {
    let root = output_root(inputs);
    let center = build_modality(&root, &inputs.id, inputs.center(), options, &normalizer)?;
    let moving = inputs
        .moving()
        .iter()
        .map(|m| build_modality(&root, &inputs.id, m, options, &normalizer))
        .collect::<Result<Vec<_>>>()?;
    Exam::new(center, moving)
}
