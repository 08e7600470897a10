//! Brain extraction backends.
//!
//! [`HdBetExtractor`] computes masks with the HD-BET command-line tool.
//! Applying an existing mask is done natively by [`mask::apply_mask_file`].

pub mod hd_bet;
pub mod mask;

pub use hd_bet::{HdBetExtractor, HdBetMode};
pub use mask::{apply_binary_mask, apply_mask_file};
