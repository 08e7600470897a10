//! Intensity normalizers.

pub mod percentile;

pub use percentile::PercentileNormalizer;
