//! Voxel grid geometry of a NIfTI volume.

use nalgebra::{Matrix4, Vector3};
use nifti::NiftiHeader;

/// Shape plus voxel-to-world affine.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub shape: Vec<usize>,
    pub affine: Matrix4<f64>,
}

impl Geometry {
    /// Derive the geometry from a header, preferring sform over qform and
    /// falling back to pixdim scaling.
    pub fn from_header(header: &NiftiHeader) -> Self {
        let ndim = (header.dim[0] as usize).clamp(1, 7);
        let shape = header.dim[1..=ndim].iter().map(|&d| d as usize).collect();
        Self {
            shape,
            affine: header_affine(header),
        }
    }

    /// Physical voxel size along the three spatial axes.
    pub fn spacing(&self) -> [f64; 3] {
        let column = |c: usize| Vector3::new(self.affine[(0, c)], self.affine[(1, c)], self.affine[(2, c)]).norm();
        [column(0), column(1), column(2)]
    }

    pub fn origin(&self) -> [f64; 3] {
        [self.affine[(0, 3)], self.affine[(1, 3)], self.affine[(2, 3)]]
    }

    /// Whether both volumes sample the same grid within `tolerance` (mm).
    pub fn same_grid(&self, other: &Geometry, tolerance: f64) -> bool {
        self.shape == other.shape
            && self
                .affine
                .iter()
                .zip(other.affine.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

fn header_affine(header: &NiftiHeader) -> Matrix4<f64> {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut m = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                m[(r, c)] = *v as f64;
            }
        }
        return m;
    }

    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64;

    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] as f64 };
        let dz = dz * qfac;

        #[rustfmt::skip]
        let m = Matrix4::new(
            (a*a + b*b - c*c - d*d) * dx, (2.0*b*c - 2.0*a*d) * dy,     (2.0*b*d + 2.0*a*c) * dz,     header.quatern_x as f64,
            (2.0*b*c + 2.0*a*d) * dx,     (a*a + c*c - b*b - d*d) * dy, (2.0*c*d - 2.0*a*b) * dz,     header.quatern_y as f64,
            (2.0*b*d - 2.0*a*c) * dx,     (2.0*c*d + 2.0*a*b) * dy,     (a*a + d*d - c*c - b*b) * dz, header.quatern_z as f64,
            0.0,                          0.0,                          0.0,                          1.0,
        );
        return m;
    }

    Matrix4::new_nonuniform_scaling(&Vector3::new(dx, dy, dz))
}
