//! Discovery of BraTS-style exams.
//!
//! Every sub-directory of the data directory is one exam. Inside it, a
//! modality is a file ending in `<modality>.nii.gz`, with optional label
//! siblings ending in `<modality>_roi.nii.gz` and `<modality>_biopsy.nii.gz`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brainprep_core::BinaryKind;
use tracing::warn;
use walkdir::WalkDir;

/// Known modalities, in center priority order.
pub const MODALITIES: [&str; 4] = ["t1c", "t2", "t1", "fla"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModality {
    pub name: String,
    pub image: PathBuf,
    pub roi: Option<PathBuf>,
    pub biopsy: Option<PathBuf>,
}

impl DiscoveredModality {
    pub fn binary(&self, kind: BinaryKind) -> Option<&Path> {
        match kind {
            BinaryKind::Roi => self.roi.as_deref(),
            BinaryKind::Biopsy => self.biopsy.as_deref(),
        }
    }
}

/// Inputs of one exam. The first modality is the center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamInputs {
    pub id: String,
    pub dir: PathBuf,
    pub modalities: Vec<DiscoveredModality>,
}

impl ExamInputs {
    pub fn center(&self) -> &DiscoveredModality {
        &self.modalities[0]
    }

    pub fn moving(&self) -> &[DiscoveredModality] {
        &self.modalities[1..]
    }
}

/// List the exams under `data_dir`, sorted by directory name. Directories
/// without any known modality are skipped with a warning.
pub fn discover_exams(data_dir: &Path) -> Result<Vec<ExamInputs>> {
    let mut exams = Vec::new();
    for entry in WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", data_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        match discover_exam(entry.path())? {
            Some(exam) => exams.push(exam),
            None => warn!("No modality found in {}, skipping", entry.path().display()),
        }
    }
    Ok(exams)
}

/// Collect the modalities of one exam directory.
pub fn discover_exam(dir: &Path) -> Result<Option<ExamInputs>> {
    let id = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no directory name", dir.display()))?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut modalities = Vec::new();
    for name in MODALITIES {
        let Some(image) = unique_match(&files, &format!("{name}.nii.gz"), dir)? else {
            continue;
        };
        modalities.push(DiscoveredModality {
            name: name.to_string(),
            image,
            roi: unique_match(&files, &format!("{name}_roi.nii.gz"), dir)?,
            biopsy: unique_match(&files, &format!("{name}_biopsy.nii.gz"), dir)?,
        });
    }

    if modalities.is_empty() {
        return Ok(None);
    }
    Ok(Some(ExamInputs {
        id,
        dir: dir.to_path_buf(),
        modalities,
    }))
}

/// The single file whose name ends with `suffix`. Ambiguous matches are
/// ignored with a warning.
fn unique_match(files: &[PathBuf], suffix: &str, dir: &Path) -> Result<Option<PathBuf>> {
    let matches: Vec<&PathBuf> = files
        .iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with(suffix))
                .unwrap_or(false)
        })
        .collect();
    match matches.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some((*single).clone())),
        _ => {
            warn!(
                "{} files ending in {} in {}, ignoring them",
                matches.len(),
                suffix,
                dir.display()
            );
            Ok(None)
        }
    }
}
