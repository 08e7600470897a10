//! Artifact references and the per-stage artifact table.
//!
//! An [`ArtifactRef`] is an immutable handle to a volume on disk. Every
//! modality keeps one [`ArtifactTrack`] per volume kind (image, ROI, biopsy):
//! an append-only arena of [`ArtifactRecord`]s, one per stage that touched the
//! volume. The "current" artifact is always the last record.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, Result};

/// File extension used for every volume the pipeline writes.
pub const VOLUME_EXTENSION: &str = "nii.gz";

/// Immutable handle to a volume on durable or scratch storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactRef(PathBuf);

impl ArtifactRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Path of a volume named `name` inside `dir`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self(dir.join(format!("{name}.{VOLUME_EXTENSION}")))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Copy the referenced file byte-for-byte to `destination`, creating
    /// parent directories as needed.
    pub fn copy_to(&self, destination: &Path) -> Result<ArtifactRef> {
        ensure_parent(destination)?;
        fs::copy(&self.0, destination).map_err(|e| PreprocessError::io(&self.0, e))?;
        Ok(ArtifactRef::new(destination))
    }
}

impl AsRef<Path> for ArtifactRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Handle to a spatial transform estimated by a registrator.
///
/// The representation behind the path is owned by the registrator backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformRef(PathBuf);

impl TransformRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for TransformRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for TransformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Binary label volumes that travel with a modality's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    Roi,
    Biopsy,
}

impl BinaryKind {
    pub const ALL: [BinaryKind; 2] = [BinaryKind::Roi, BinaryKind::Biopsy];

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryKind::Roi => "roi",
            BinaryKind::Biopsy => "biopsy",
        }
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which volume of a modality an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Image,
    Binary(BinaryKind),
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Image => f.write_str("image"),
            ArtifactKind::Binary(kind) => kind.fmt(f),
        }
    }
}

/// Pipeline stages that produce artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// The caller-supplied original volume.
    Input,
    Coregistration,
    AtlasRegistration,
    AtlasCorrection,
    BrainExtraction,
    /// Early in-place normalization requested by a caller.
    Normalization,
}

impl Stage {
    /// The four ordered processing stages of a run.
    pub const PIPELINE: [Stage; 4] = [
        Stage::Coregistration,
        Stage::AtlasRegistration,
        Stage::AtlasCorrection,
        Stage::BrainExtraction,
    ];

    /// Scratch sub-directory holding this stage's outputs.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Coregistration => "coregistration",
            Stage::AtlasRegistration => "atlas-space",
            Stage::AtlasCorrection => "atlas-correction",
            Stage::BrainExtraction => "brain-extraction",
            Stage::Normalization => "normalization",
        }
    }

    /// File name prefix for artifacts written by this stage.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Coregistration => "co",
            Stage::AtlasRegistration => "atlas",
            Stage::AtlasCorrection => "atlas_corrected",
            Stage::BrainExtraction => "brain_masked",
            Stage::Normalization => "normalized",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Coregistration => "coregistration",
            Stage::AtlasRegistration => "atlas registration",
            Stage::AtlasCorrection => "atlas correction",
            Stage::BrainExtraction => "brain extraction",
            Stage::Normalization => "normalization",
        };
        f.write_str(name)
    }
}

/// One entry of the artifact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub stage: Stage,
    pub artifact: ArtifactRef,
    /// Transform that produced this artifact, if it was resampled.
    pub transform: Option<TransformRef>,
}

/// Append-only history of one volume of one modality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTrack {
    records: Vec<ArtifactRecord>,
}

impl ArtifactTrack {
    /// Start a track from the caller-supplied original.
    pub fn new(original: ArtifactRef) -> Self {
        Self {
            records: vec![ArtifactRecord {
                stage: Stage::Input,
                artifact: original,
                transform: None,
            }],
        }
    }

    pub fn original(&self) -> &ArtifactRef {
        &self.records[0].artifact
    }

    pub fn current(&self) -> &ArtifactRef {
        &self.latest().artifact
    }

    pub fn latest(&self) -> &ArtifactRecord {
        // The track is never empty: `new` seeds it with the original.
        &self.records[self.records.len() - 1]
    }

    /// Advance the current artifact.
    pub fn advance(&mut self, stage: Stage, artifact: ArtifactRef, transform: Option<TransformRef>) {
        self.records.push(ArtifactRecord {
            stage,
            artifact,
            transform,
        });
    }

    /// Last record written by `stage`, if any.
    pub fn at(&self, stage: Stage) -> Option<&ArtifactRecord> {
        self.records.iter().rev().find(|r| r.stage == stage)
    }

    pub fn records(&self) -> &[ArtifactRecord] {
        &self.records
    }
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| PreprocessError::io(parent, e))
        }
        _ => Ok(()),
    }
}
