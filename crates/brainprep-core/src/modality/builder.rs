use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::{ArtifactRef, ArtifactTrack, BinaryKind};
use crate::collaborators::Normalizer;
use crate::error::{PreprocessError, Result};

use super::{Modality, OutputPaths, OutputSlot, OutputVariant};

/// Builder enforcing the construction invariants of [`Modality`].
#[derive(Debug, Clone)]
pub struct ModalityBuilder {
    name: String,
    image: PathBuf,
    roi: Option<PathBuf>,
    biopsy: Option<PathBuf>,
    outputs: OutputPaths,
    normalizer: Option<Arc<dyn Normalizer>>,
    atlas_correction: bool,
}

impl ModalityBuilder {
    pub fn new(name: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            roi: None,
            biopsy: None,
            outputs: OutputPaths::default(),
            normalizer: None,
            atlas_correction: true,
        }
    }

    pub fn roi(mut self, path: impl Into<PathBuf>) -> Self {
        self.roi = Some(path.into());
        self
    }

    pub fn biopsy(mut self, path: impl Into<PathBuf>) -> Self {
        self.biopsy = Some(path.into());
        self
    }

    pub fn binary(self, kind: BinaryKind, path: impl Into<PathBuf>) -> Self {
        match kind {
            BinaryKind::Roi => self.roi(path),
            BinaryKind::Biopsy => self.biopsy(path),
        }
    }

    pub fn output(mut self, variant: OutputVariant, slot: OutputSlot) -> Self {
        self.outputs.set(variant, slot);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Whether the modality is re-registered directly in atlas space
    /// (default `true`; ignored for the center modality).
    pub fn atlas_correction(mut self, enabled: bool) -> Self {
        self.atlas_correction = enabled;
        self
    }

    pub fn build(self) -> Result<Modality> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(PreprocessError::invalid_configuration(format!(
                "invalid modality name {:?}",
                self.name
            )));
        }
        if self.outputs.is_empty() {
            return Err(PreprocessError::invalid_configuration(format!(
                "modality {}: all output paths are unset, at least one must be provided",
                self.name
            )));
        }
        for (variant, _) in self.outputs.iter() {
            if variant.is_normalized() && self.normalizer.is_none() {
                return Err(PreprocessError::invalid_configuration(format!(
                    "modality {}: a normalizer must be provided for the {} output",
                    self.name, variant
                )));
            }
        }
        for kind in BinaryKind::ALL {
            let has_input = match kind {
                BinaryKind::Roi => self.roi.is_some(),
                BinaryKind::Biopsy => self.biopsy.is_some(),
            };
            if self.outputs.any_binary(kind) && !has_input {
                return Err(PreprocessError::invalid_configuration(format!(
                    "modality {}: {} output requested without a {} input",
                    self.name, kind, kind
                )));
            }
        }

        Ok(Modality {
            name: self.name,
            image: ArtifactTrack::new(ArtifactRef::new(self.image)),
            roi: self.roi.map(|p| ArtifactTrack::new(ArtifactRef::new(p))),
            biopsy: self.biopsy.map(|p| ArtifactTrack::new(ArtifactRef::new(p))),
            outputs: self.outputs,
            normalizer: self.normalizer,
            atlas_correction: self.atlas_correction,
        })
    }
}
