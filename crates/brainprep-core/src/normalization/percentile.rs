//! Percentile-based intensity normalization.

use serde::{Deserialize, Serialize};

use crate::collaborators::{Normalizer, VolumeData};
use crate::error::{PreprocessError, Result};

/// Maps the intensity at `lower_percentile` to `lower_limit` and the
/// intensity at `upper_percentile` to `upper_limit`, clamping outside.
///
/// Percentiles use linear interpolation between order statistics and ignore
/// non-finite voxels, which are written as `lower_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentileNormalizer {
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub lower_limit: f32,
    pub upper_limit: f32,
}

impl Default for PercentileNormalizer {
    fn default() -> Self {
        Self {
            lower_percentile: 0.1,
            upper_percentile: 99.9,
            lower_limit: 0.0,
            upper_limit: 1.0,
        }
    }
}

impl PercentileNormalizer {
    pub fn new(
        lower_percentile: f64,
        upper_percentile: f64,
        lower_limit: f32,
        upper_limit: f32,
    ) -> Result<Self> {
        let normalizer = Self {
            lower_percentile,
            upper_percentile,
            lower_limit,
            upper_limit,
        };
        normalizer.validate()?;
        Ok(normalizer)
    }

    /// Check parameter ranges; deserialized values bypass [`Self::new`].
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.lower_percentile)
            || !(0.0..=100.0).contains(&self.upper_percentile)
            || self.lower_percentile >= self.upper_percentile
        {
            return Err(PreprocessError::invalid_configuration(format!(
                "percentiles must satisfy 0 <= lower < upper <= 100, got {} and {}",
                self.lower_percentile, self.upper_percentile
            )));
        }
        if !(self.lower_limit < self.upper_limit) {
            return Err(PreprocessError::invalid_configuration(format!(
                "normalization limits must satisfy lower < upper, got {} and {}",
                self.lower_limit, self.upper_limit
            )));
        }
        Ok(())
    }

    /// Intensities at the configured percentiles.
    pub fn bounds(&self, image: &VolumeData) -> Result<(f32, f32)> {
        let mut values: Vec<f32> = image.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Err(PreprocessError::normalization(
                "volume contains no finite voxels",
            ));
        }
        values.sort_unstable_by(f32::total_cmp);
        Ok((
            percentile(&values, self.lower_percentile),
            percentile(&values, self.upper_percentile),
        ))
    }
}

impl Normalizer for PercentileNormalizer {
    fn normalize(&self, image: &VolumeData) -> Result<VolumeData> {
        self.validate()?;
        let (low, high) = self.bounds(image)?;
        let range = high - low;
        let span = self.upper_limit - self.lower_limit;
        let lower_limit = self.lower_limit;

        if range <= f32::EPSILON * low.abs().max(1.0) {
            return Ok(image.mapv(|_| lower_limit));
        }
        Ok(image.mapv(|v| {
            if !v.is_finite() {
                return lower_limit;
            }
            let t = ((v - low) / range).clamp(0.0, 1.0);
            lower_limit + t * span
        }))
    }
}

/// Percentile `q` (0..=100) of sorted values, interpolating linearly.
fn percentile(sorted: &[f32], q: f64) -> f32 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
