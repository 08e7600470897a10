use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use brainprep_core::{
    PreprocessError, RegistrationRequest, Registrator, Result, RunContext, TransformRef, TransformRequest,
};
use nalgebra::Matrix4;
use tracing::debug;

use crate::itk_transform::{read_affine, write_affine};

/// Registrator that treats every pair of volumes as already aligned.
///
/// Outputs are byte-for-byte copies of the moving volume and the estimated
/// transform is an identity ITK file. Applying any other transform fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRegistrator;

impl IdentityRegistrator {
    pub fn new() -> Self {
        Self
    }
}

/// `<prefix>.tfm`, keeping any dots already in the prefix.
fn transform_path(prefix: &Path) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push(".tfm");
    PathBuf::from(path)
}

impl Registrator for IdentityRegistrator {
    fn register(&self, request: &RegistrationRequest<'_>, _ctx: &RunContext) -> Result<TransformRef> {
        let matrix = transform_path(request.matrix);
        request.moving.copy_to(request.output)?;
        write_affine(&matrix, &Matrix4::identity())?;
        fs::write(
            request.log,
            format!("identity registration of {} onto {}\n", request.moving, request.fixed),
        )
        .map_err(|e| PreprocessError::io(request.log, e))?;
        debug!("Identity registration {} -> {}", request.moving, request.output.display());
        Ok(TransformRef::new(matrix))
    }

    fn transform(&self, request: &TransformRequest<'_>, _ctx: &RunContext) -> Result<()> {
        let affine = read_affine(request.transform.path())?;
        if affine != Matrix4::identity() {
            return Err(PreprocessError::registration(format!(
                "identity registrator cannot apply non-identity transform {}",
                request.transform
            )));
        }
        request.moving.copy_to(request.output)?;
        let kind = if request.interpolation.is_binary() { "label" } else { "image" };
        fs::write(
            request.log,
            format!("identity transform of {} {}\n", kind, request.moving),
        )
        .map_err(|e| PreprocessError::io(request.log, e))?;
        Ok(())
    }
}
