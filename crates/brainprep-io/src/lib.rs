pub mod fs;
pub mod geometry;
pub mod nifti_io;
pub mod process;

pub use fs::copy_tree;
pub use geometry::Geometry;
pub use nifti_io::{read_geometry, read_nifti, write_nifti, NiftiIo};
pub use process::run_logged;
