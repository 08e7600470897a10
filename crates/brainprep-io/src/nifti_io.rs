use std::path::Path;

use anyhow::{Context, Result};
use brainprep_core::{PreprocessError, VolumeData, VolumeIo};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

use crate::geometry::Geometry;

/// Read a NIfTI (or gzipped NIfTI) file as `f32` voxels with its header.
///
/// Scaling (`scl_slope`/`scl_inter`) is applied while loading.
pub fn read_nifti<P: AsRef<Path>>(path: P) -> Result<(NiftiHeader, VolumeData)> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;
    Ok((header, data))
}

/// Read only the voxel grid of a NIfTI file.
pub fn read_geometry<P: AsRef<Path>>(path: P) -> Result<Geometry> {
    let path = path.as_ref();
    let header = NiftiHeader::from_file(path)
        .with_context(|| format!("Failed to read NIfTI header {}", path.display()))?;
    Ok(Geometry::from_header(&header))
}

/// Write `data` to `path`, reusing orientation and spacing from `reference`.
///
/// Data type and dimensions are taken from `data`; intensity scaling is
/// reset because the voxels are already scaled.
pub fn write_nifti<P: AsRef<Path>>(path: P, data: &VolumeData, reference: &NiftiHeader) -> Result<()> {
    let path = path.as_ref();
    let mut header = reference.clone();
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(data)
        .map_err(|e| anyhow::anyhow!("Failed to write NIfTI file {}: {}", path.display(), e))?;
    debug!("Wrote {} ({:?})", path.display(), data.shape());
    Ok(())
}

/// [`VolumeIo`] backed by the `nifti` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiIo;

impl NiftiIo {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeIo for NiftiIo {
    fn read(&self, path: &Path) -> brainprep_core::Result<VolumeData> {
        read_nifti(path)
            .map(|(_, data)| data)
            .map_err(|e| PreprocessError::volume_io(format!("{e:#}")))
    }

    fn write(&self, data: &VolumeData, path: &Path, reference: &Path) -> brainprep_core::Result<()> {
        let header = NiftiHeader::from_file(reference).map_err(|e| {
            PreprocessError::volume_io(format!(
                "Failed to read reference header {}: {}",
                reference.display(),
                e
            ))
        })?;
        write_nifti(path, data, &header).map_err(|e| PreprocessError::volume_io(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};
    use tempfile::tempdir;

    #[test]
    fn test_read_nifti_basic() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.nii");

        let data: Vec<f32> = (0..3 * 4 * 5).map(|x| x as f32).collect();
        let array = Array3::from_shape_vec((3, 4, 5), data)?;
        WriterOptions::new(&file_path).write_nifti(&array)?;

        let (header, volume) = read_nifti(&file_path)?;
        assert_eq!(volume.shape(), &[3, 4, 5]);
        assert_eq!(header.dim[0], 3);
        assert_eq!(volume[IxDyn(&[0, 0, 0])], 0.0);
        assert_eq!(volume[IxDyn(&[2, 3, 4])], 59.0);
        Ok(())
    }

    #[test]
    fn test_write_reuses_reference_geometry() -> Result<()> {
        let dir = tempdir()?;
        let reference_path = dir.path().join("reference.nii.gz");
        let output_path = dir.path().join("output.nii.gz");

        let reference = NiftiHeader {
            sform_code: 1,
            srow_x: [2.0, 0.0, 0.0, -90.0],
            srow_y: [0.0, 2.0, 0.0, -126.0],
            srow_z: [0.0, 0.0, 2.0, -72.0],
            ..NiftiHeader::default()
        };
        let array = Array3::<f32>::zeros((2, 3, 4));
        WriterOptions::new(&reference_path)
            .reference_header(&reference)
            .write_nifti(&array)?;

        let io = NiftiIo::new();
        let volume = io.read(&reference_path)?;
        let doubled = volume.mapv(|v| v + 2.0);
        io.write(&doubled, &output_path, &reference_path)?;

        let geometry = read_geometry(&output_path)?;
        assert_eq!(geometry.shape, vec![2, 3, 4]);
        assert_eq!(geometry.spacing(), [2.0, 2.0, 2.0]);
        assert_eq!(geometry.origin(), [-90.0, -126.0, -72.0]);
        assert!(io.read(&output_path)?.iter().all(|v| *v == 2.0));
        Ok(())
    }

    #[test]
    fn test_unreadable_volume_is_volume_io_error() {
        let err = NiftiIo::new()
            .read(Path::new("/non/existent/volume.nii.gz"))
            .unwrap_err();
        assert!(matches!(err, PreprocessError::VolumeIoError(_)));
    }
}
