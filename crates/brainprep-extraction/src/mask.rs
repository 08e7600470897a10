//! Native application of binary brain masks.

use std::path::Path;

use brainprep_core::artifact::ensure_parent;
use brainprep_core::{PreprocessError, Result, VolumeData};
use brainprep_io::{read_nifti, write_nifti, Geometry};
use ndarray::Zip;
use tracing::{debug, warn};

/// Voxels with a mask value above this are inside the brain.
const MASK_THRESHOLD: f32 = 0.5;

/// Affine entries may differ by this much (mm) between image and mask.
const GRID_TOLERANCE: f64 = 1e-3;

/// Zero every voxel of `image` outside `mask`.
pub fn apply_binary_mask(image: &VolumeData, mask: &VolumeData) -> Result<VolumeData> {
    if image.shape() != mask.shape() {
        return Err(PreprocessError::ShapeMismatch {
            expected: image.shape().to_vec(),
            actual: mask.shape().to_vec(),
        });
    }
    let mut masked = image.clone();
    Zip::from(&mut masked).and(mask).for_each(|voxel, &m| {
        if m.is_nan() || m <= MASK_THRESHOLD {
            *voxel = 0.0;
        }
    });
    Ok(masked)
}

/// Apply the mask stored at `mask` to the volume at `input`, writing the
/// result to `output` with the input's header.
pub fn apply_mask_file(input: &Path, mask: &Path, output: &Path) -> Result<()> {
    let (header, image) =
        read_nifti(input).map_err(|e| PreprocessError::volume_io(format!("{e:#}")))?;
    let (mask_header, mask_data) =
        read_nifti(mask).map_err(|e| PreprocessError::volume_io(format!("{e:#}")))?;

    let image_grid = Geometry::from_header(&header);
    let mask_grid = Geometry::from_header(&mask_header);
    if image_grid.shape == mask_grid.shape && !image_grid.same_grid(&mask_grid, GRID_TOLERANCE) {
        warn!(
            "Mask {} and image {} share a shape but not an affine",
            mask.display(),
            input.display()
        );
    }

    let masked = apply_binary_mask(&image, &mask_data)?;
    ensure_parent(output)?;
    write_nifti(output, &masked, &header).map_err(|e| PreprocessError::volume_io(format!("{e:#}")))?;
    debug!("Masked {} with {} into {}", input.display(), mask.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};
    use nifti::writer::WriterOptions;
    use tempfile::tempdir;

    fn volume(values: Vec<f32>) -> VolumeData {
        Array3::from_shape_vec((2, 2, 1), values).unwrap().into_dyn()
    }

    #[test]
    fn test_outside_voxels_are_zeroed() {
        let image = volume(vec![5.0, 6.0, 7.0, 8.0]);
        let mask = volume(vec![1.0, 0.0, 1.0, 0.0]);
        let masked = apply_binary_mask(&image, &mask).unwrap();
        assert_eq!(masked.iter().copied().collect::<Vec<_>>(), vec![5.0, 0.0, 7.0, 0.0]);
    }

    #[test]
    fn test_nan_mask_counts_as_outside() {
        let image = volume(vec![1.0; 4]);
        let mask = volume(vec![f32::NAN, 1.0, 1.0, 1.0]);
        let masked = apply_binary_mask(&image, &mask).unwrap();
        assert_eq!(masked[IxDyn(&[0, 0, 0])], 0.0);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let image = volume(vec![1.0; 4]);
        let mask = Array3::<f32>::ones((2, 1, 1)).into_dyn();
        let err = apply_binary_mask(&image, &mask).unwrap_err();
        assert!(matches!(err, PreprocessError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_apply_mask_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("t2.nii.gz");
        let mask = dir.path().join("mask.nii.gz");
        let output = dir.path().join("brain_masked/brain_masked__t2.nii.gz");

        let image = Array3::from_shape_vec((2, 2, 1), vec![3.0f32, 4.0, 5.0, 6.0]).unwrap();
        let labels = Array3::from_shape_vec((2, 2, 1), vec![0.0f32, 1.0, 1.0, 0.0]).unwrap();
        WriterOptions::new(&input).write_nifti(&image).unwrap();
        WriterOptions::new(&mask).write_nifti(&labels).unwrap();

        apply_mask_file(&input, &mask, &output).unwrap();

        let (_, masked) = read_nifti(&output).unwrap();
        assert_eq!(masked.iter().copied().collect::<Vec<_>>(), vec![0.0, 4.0, 5.0, 0.0]);
    }
}
