//! Window based median noise estimation on one dimensional data.
//!
//! The estimator partitions the axis (m/z or retention time) into two
//! interleaved sets of fixed width windows, the second set offset by half a
//! window, and stores the median intensity of every window. A query returns
//! the average of the two window medians containing the position, which
//! attenuates the error made at window borders. Most callers divide by the
//! noise value, so it is floored at 1.0.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;
use crate::helper_functions::median_in_place;
use crate::spectrum::Experiment;

/// The default m/z window length for per spectrum noise estimation, in Th
pub const DEFAULT_MZ_NOISE_WINDOW: f64 = 20.0;

/// A built noise estimator over a single ordered (position, intensity) series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoiseEstimator {
    x_start: f64,
    window_length: f64,
    /// Medians for windows starting at `x_start`
    even: Vec<f64>,
    /// Medians for windows starting at `x_start - window_length / 2`
    odd: Vec<f64>,
}

impl NoiseEstimator {
    /// Build an estimator from an ascending position axis and its intensities.
    ///
    /// # Errors
    /// When `window_length` is not a positive finite number, or the two slices
    /// differ in length.
    pub fn from_series(
        positions: &[f64],
        intensities: &[f64],
        window_length: f64,
    ) -> Result<Self, FeatureFindingError> {
        if !(window_length > 0.0 && window_length.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "window_length",
                "must be a positive finite number",
            ));
        }
        if positions.len() != intensities.len() {
            return Err(FeatureFindingError::malformed(
                None,
                "the position and intensity arrays differ in length",
            ));
        }
        if positions.is_empty() {
            // Identity estimator: noise 1.0 everywhere
            return Ok(Self {
                x_start: 0.0,
                window_length,
                even: Vec::new(),
                odd: Vec::new(),
            });
        }

        let x_start = positions[0];
        let span = positions[positions.len() - 1] - x_start;
        let windows = (span / window_length) as usize + 1;
        let even = window_medians(positions, intensities, x_start, window_length, windows);
        let odd = window_medians(
            positions,
            intensities,
            x_start - window_length / 2.0,
            window_length,
            windows + 1,
        );

        Ok(Self {
            x_start,
            window_length,
            even,
            odd,
        })
    }

    /// The noise value at the given position: the average of the two window
    /// medians covering it, floored at 1.0. Positions outside the built domain
    /// clamp to the nearest window.
    pub fn noise_at(&self, x: f64) -> f64 {
        if self.even.is_empty() {
            return 1.0;
        }
        let even = self.window_value(&self.even, x - self.x_start);
        let odd = self.window_value(&self.odd, x - self.x_start + self.window_length / 2.0);
        f64::max(1.0, (even + odd) / 2.0)
    }

    fn window_value(&self, windows: &[f64], offset: f64) -> f64 {
        let index = ((offset / self.window_length) as isize).clamp(0, windows.len() as isize - 1);
        windows[index as usize]
    }
}

/// The median intensity per window. Windows holding fewer than two points get
/// the identity noise of 1.0.
fn window_medians(
    positions: &[f64],
    intensities: &[f64],
    start: f64,
    window_length: f64,
    windows: usize,
) -> Vec<f64> {
    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); windows];
    for (x, intensity) in positions.iter().zip(intensities) {
        let index = ((x - start) / window_length) as usize;
        if let Some(bucket) = buckets.get_mut(index) {
            bucket.push(*intensity);
        }
    }
    buckets
        .into_iter()
        .map(|mut bucket| {
            if bucket.len() < 2 {
                1.0
            } else {
                median_in_place(&mut bucket).unwrap_or(1.0)
            }
        })
        .collect()
}

/// Per spectrum noise estimators over the m/z axis of an experiment, used for
/// noise aware seeding and peak acceptance. Keyed by spectrum index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NoiseMap {
    estimators: HashMap<usize, NoiseEstimator>,
}

impl NoiseMap {
    /// Build an estimator for every MS1 spectrum of the experiment.
    ///
    /// # Errors
    /// When `window_mz` is not a positive finite number.
    pub fn from_experiment(
        experiment: &Experiment,
        window_mz: f64,
    ) -> Result<Self, FeatureFindingError> {
        let mut estimators = HashMap::new();
        for index in experiment.ms1_indices() {
            let spectrum = &experiment[index];
            let mzs: Vec<f64> = spectrum.peaks().map(|p| p.mz.value).collect();
            let intensities: Vec<f64> = spectrum.peaks().map(|p| p.intensity.into_inner()).collect();
            estimators.insert(index, NoiseEstimator::from_series(&mzs, &intensities, window_mz)?);
        }
        Ok(Self { estimators })
    }

    /// The noise value on the m/z axis of the given spectrum, 1.0 when the
    /// spectrum has no estimator.
    pub fn noise_at(&self, spectrum_index: usize, mz: f64) -> f64 {
        self.estimators
            .get(&spectrum_index)
            .map_or(1.0, |estimator| estimator.noise_at(mz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_is_identity() {
        let estimator = NoiseEstimator::from_series(&[], &[], 10.0).unwrap();
        assert!((estimator.noise_at(500.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_window() {
        assert!(NoiseEstimator::from_series(&[1.0], &[1.0], 0.0).is_err());
        assert!(NoiseEstimator::from_series(&[1.0], &[1.0], f64::NAN).is_err());
    }

    #[test]
    fn sparse_windows_fall_back_to_identity() {
        // One point per window: median undefined, noise 1.0
        let estimator = NoiseEstimator::from_series(&[0.0, 100.0], &[5000.0, 5000.0], 1.0).unwrap();
        assert!((estimator.noise_at(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn median_noise_in_dense_window() {
        let positions: Vec<f64> = (0..100).map(f64::from).collect();
        let intensities: Vec<f64> = (0..100).map(|i| if i % 10 == 0 { 1000.0 } else { 10.0 }).collect();
        let estimator = NoiseEstimator::from_series(&positions, &intensities, 50.0).unwrap();
        // The median in every window is the baseline, not the spikes
        let noise = estimator.noise_at(50.0);
        assert!((noise - 10.0).abs() < 1e-9, "noise was {noise}");
    }

    #[test]
    fn queries_clamp_outside_domain() {
        let positions: Vec<f64> = (0..10).map(f64::from).collect();
        let intensities = vec![7.0; 10];
        let estimator = NoiseEstimator::from_series(&positions, &intensities, 5.0).unwrap();
        assert!(estimator.noise_at(-100.0) >= 1.0);
        assert!(estimator.noise_at(100.0) >= 1.0);
    }
}
