//! Minimal reader/writer for ITK text transform files (`.tfm`).
//!
//! Only a single `AffineTransform_double_3_3` (or `MatrixOffsetTransformBase`)
//! with a zero center is supported.

use std::fs;
use std::path::Path;

use brainprep_core::{PreprocessError, Result};
use nalgebra::{Matrix3, Matrix4, Vector3};

const HEADER: &str = "#Insight Transform File V1.0";

/// Write a 4x4 homogeneous affine as an ITK text transform.
pub fn write_affine(path: &Path, affine: &Matrix4<f64>) -> Result<()> {
    let mut params = Vec::with_capacity(12);
    for r in 0..3 {
        for c in 0..3 {
            params.push(affine[(r, c)]);
        }
    }
    params.extend([affine[(0, 3)], affine[(1, 3)], affine[(2, 3)]]);
    let params: Vec<String> = params.iter().map(|v| v.to_string()).collect();

    let text = format!(
        "{HEADER}\n#Transform 0\nTransform: AffineTransform_double_3_3\nParameters: {}\nFixedParameters: 0 0 0\n",
        params.join(" ")
    );
    fs::write(path, text).map_err(|e| PreprocessError::io(path, e))
}

/// Read an affine written by [`write_affine`] or by ITK/ANTs text output.
pub fn read_affine(path: &Path) -> Result<Matrix4<f64>> {
    let text = fs::read_to_string(path).map_err(|e| PreprocessError::io(path, e))?;
    if !text.starts_with(HEADER) {
        return Err(PreprocessError::registration(format!(
            "{} is not an ITK text transform",
            path.display()
        )));
    }
    let params: Vec<f64> = text
        .lines()
        .find_map(|line| line.strip_prefix("Parameters:"))
        .ok_or_else(|| PreprocessError::registration(format!("{} has no parameters", path.display())))?
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| PreprocessError::registration(format!("{}: {}", path.display(), e)))?;

    if params.len() != 12 {
        return Err(PreprocessError::registration(format!(
            "{}: expected 12 affine parameters, found {}",
            path.display(),
            params.len()
        )));
    }

    let linear = Matrix3::from_row_slice(&params[..9]);
    let translation = Vector3::new(params[9], params[10], params[11]);
    let mut affine = linear.to_homogeneous();
    affine.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    Ok(affine)
}
