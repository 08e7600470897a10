//! Scoped scratch directory for one run.

use std::fs;
use std::path::{Path, PathBuf};

use brainprep_core::{PreprocessError, Result, Stage};
use tempfile::{Builder, TempDir};
use tracing::{debug, info};

/// Scratch directory holding the intermediate artifacts of one run.
///
/// The directory is deleted when the workspace is dropped, whether the run
/// succeeded or not, unless it was created with `keep` set.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    dir: Option<TempDir>,
}

impl Workspace {
    /// Create a fresh workspace under `parent`, or under the system temp
    /// directory if `parent` is `None`.
    pub fn create(parent: Option<&Path>, keep: bool) -> Result<Self> {
        let mut builder = Builder::new();
        builder.prefix("brainprep-");
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| PreprocessError::io(parent, e))?;
                builder.tempdir_in(parent).map_err(|e| PreprocessError::io(parent, e))?
            }
            None => builder
                .tempdir()
                .map_err(|e| PreprocessError::io(std::env::temp_dir(), e))?,
        };

        if keep {
            let root = dir.into_path();
            info!("Keeping workspace {}", root.display());
            Ok(Self { root, dir: None })
        } else {
            let root = dir.path().to_path_buf();
            debug!("Created workspace {}", root.display());
            Ok(Self { root, dir: Some(dir) })
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the directory outlives this value.
    pub fn is_kept(&self) -> bool {
        self.dir.is_none()
    }

    /// Directory for the artifacts of `stage`, created on demand.
    pub fn stage_dir(&self, stage: Stage) -> Result<PathBuf> {
        let dir = self.root.join(stage.dir_name());
        fs::create_dir_all(&dir).map_err(|e| PreprocessError::io(&dir, e))?;
        Ok(dir)
    }

    /// Directory for masks applied to moving modalities.
    pub fn brain_masked_dir(&self) -> Result<PathBuf> {
        let dir = self.stage_dir(Stage::BrainExtraction)?.join("brain_masked");
        fs::create_dir_all(&dir).map_err(|e| PreprocessError::io(&dir, e))?;
        Ok(dir)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            debug!("Removing workspace {}", self.root.display());
            if let Err(e) = dir.close() {
                tracing::warn!("Failed to remove workspace {}: {}", self.root.display(), e);
            }
        }
    }
}
