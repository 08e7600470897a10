//! Registrator backends.
//!
//! - [`AntsRegistrator`]: rigid/affine registration through the ANTs
//!   command-line tools.
//! - [`IdentityRegistrator`]: copies volumes unchanged, for data that is
//!   already aligned and for dry runs.

pub mod ants;
pub mod identity;
pub mod itk_transform;

pub use ants::{AntsRegistrator, AntsTransformType};
pub use identity::IdentityRegistrator;
pub use itk_transform::{read_affine, write_affine};
