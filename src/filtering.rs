//! One dimensional intensity filters.
//!
//! A filter is a pure function from a sampled signal to a signal of the same
//! length. Chaining filters is done explicitly at the call site. The Gaussian
//! variant is position aware and handles unevenly sampled axes; the
//! Savitzky-Golay and top-hat variants assume approximately even sampling.

use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;

/// Conversion between a Gaussian full width at half maximum and its sigma
pub const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949; // 2 sqrt(2 ln 2)

/// A one dimensional smoothing or baseline filter
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter1D {
    /// Gaussian kernel smoothing with the given full width at half maximum,
    /// in the units of the position axis. Kernel support is truncated at
    /// three sigma.
    Gaussian {
        /// Full width at half maximum of the kernel
        fwhm: f64,
    },
    /// Savitzky-Golay least squares polynomial smoothing
    SavitzkyGolay {
        /// Window length in samples, odd and at least 3
        window: usize,
        /// Polynomial order, at least 1 and less than the window length
        order: usize,
    },
    /// Morphological top-hat: the signal minus its opening (erosion followed
    /// by dilation), which removes slowly varying baseline
    TopHat {
        /// Structuring element half width in samples
        window: usize,
    },
}

impl Filter1D {
    /// Apply the filter to a signal sampled at the given ascending positions.
    ///
    /// # Errors
    /// [`FeatureFindingError::InvalidParameter`] when the filter settings are
    /// outside their domain, [`FeatureFindingError::NumericalFailure`] when
    /// the output contains a non finite value.
    pub fn apply(&self, positions: &[f64], signal: &[f64]) -> Result<Vec<f64>, FeatureFindingError> {
        debug_assert_eq!(positions.len(), signal.len());
        let smoothed = match *self {
            Self::Gaussian { fwhm } => {
                if !(fwhm > 0.0 && fwhm.is_finite()) {
                    return Err(FeatureFindingError::invalid_parameter(
                        "fwhm",
                        "must be a positive finite number",
                    ));
                }
                gaussian(positions, signal, fwhm / FWHM_TO_SIGMA)
            }
            Self::SavitzkyGolay { window, order } => {
                if window < 3 || window % 2 == 0 {
                    return Err(FeatureFindingError::invalid_parameter(
                        "window",
                        "must be odd and at least 3",
                    ));
                }
                if order == 0 || order >= window {
                    return Err(FeatureFindingError::invalid_parameter(
                        "order",
                        "must be at least 1 and less than the window length",
                    ));
                }
                let weights = savitzky_golay_weights(window, order).ok_or_else(|| {
                    FeatureFindingError::numerical("savitzky-golay", "singular normal equations")
                })?;
                convolve_clamped(signal, &weights)
            }
            Self::TopHat { window } => {
                if window == 0 {
                    return Err(FeatureFindingError::invalid_parameter(
                        "window",
                        "must be at least 1",
                    ));
                }
                top_hat(signal, window)
            }
        };
        if smoothed.iter().any(|v| !v.is_finite()) {
            return Err(FeatureFindingError::numerical(
                "filter",
                "the filtered signal contains a non finite value",
            ));
        }
        Ok(smoothed)
    }
}

/// Position aware Gaussian smoothing, kernel truncated at three sigma
fn gaussian(positions: &[f64], signal: &[f64], sigma: f64) -> Vec<f64> {
    let support = 3.0 * sigma;
    let scale = -0.5 / (sigma * sigma);
    (0..signal.len())
        .map(|i| {
            let mut weighted = 0.0;
            let mut total = 0.0;
            // Walk outward in both directions until past the kernel support
            for j in (0..=i).rev() {
                let dx = positions[i] - positions[j];
                if dx > support {
                    break;
                }
                let w = (dx * dx * scale).exp();
                weighted += w * signal[j];
                total += w;
            }
            for j in i + 1..signal.len() {
                let dx = positions[j] - positions[i];
                if dx > support {
                    break;
                }
                let w = (dx * dx * scale).exp();
                weighted += w * signal[j];
                total += w;
            }
            weighted / total
        })
        .collect()
}

/// The central Savitzky-Golay smoothing weights for the given window and
/// polynomial order, from the normal equations of the least squares fit.
/// Returns [`None`] when the normal equations are singular.
fn savitzky_golay_weights(window: usize, order: usize) -> Option<Vec<f64>> {
    let half = (window / 2) as isize;
    let n = order + 1;
    // Normal equation matrix of power sums: A[j][k] = sum over t of t^(j+k)
    let mut matrix = vec![vec![0.0; n]; n];
    for (j, row) in matrix.iter_mut().enumerate() {
        for (k, cell) in row.iter_mut().enumerate() {
            *cell = (-half..=half)
                .map(|t| (t as f64).powi((j + k) as i32))
                .sum();
        }
    }
    let inverse_row = invert_first_row(matrix)?;
    Some(
        (-half..=half)
            .map(|t| {
                (0..n)
                    .map(|k| inverse_row[k] * (t as f64).powi(k as i32))
                    .sum()
            })
            .collect(),
    )
}

/// The first row of the inverse of a small symmetric matrix, by Gauss-Jordan
/// elimination with partial pivoting
fn invert_first_row(mut matrix: Vec<Vec<f64>>) -> Option<Vec<f64>> {
    let n = matrix.len();
    let mut identity = vec![vec![0.0; n]; n];
    for (i, row) in identity.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    for column in 0..n {
        let pivot_row = (column..n)
            .max_by(|a, b| matrix[*a][column].abs().total_cmp(&matrix[*b][column].abs()))?;
        if matrix[pivot_row][column].abs() < 1e-12 {
            return None;
        }
        matrix.swap(column, pivot_row);
        identity.swap(column, pivot_row);
        let pivot = matrix[column][column];
        for k in 0..n {
            matrix[column][k] /= pivot;
            identity[column][k] /= pivot;
        }
        for row in 0..n {
            if row != column {
                let factor = matrix[row][column];
                for k in 0..n {
                    matrix[row][k] -= factor * matrix[column][k];
                    identity[row][k] -= factor * identity[column][k];
                }
            }
        }
    }
    Some(identity.swap_remove(0))
}

/// Convolve with a centred weight vector, clamping the window at the borders
/// and renormalising the weights that fall inside
fn convolve_clamped(signal: &[f64], weights: &[f64]) -> Vec<f64> {
    let half = weights.len() / 2;
    (0..signal.len())
        .map(|i| {
            let mut value = 0.0;
            let mut total = 0.0;
            for (k, w) in weights.iter().enumerate() {
                let j = i as isize + k as isize - half as isize;
                if j >= 0 && (j as usize) < signal.len() {
                    value += w * signal[j as usize];
                    total += w;
                }
            }
            if total.abs() > f64::EPSILON {
                value / total
            } else {
                value
            }
        })
        .collect()
}

/// Top-hat transform: the signal minus its morphological opening
fn top_hat(signal: &[f64], half_width: usize) -> Vec<f64> {
    let eroded = morphological(signal, half_width, f64::min, f64::INFINITY);
    let opened = morphological(&eroded, half_width, f64::max, f64::NEG_INFINITY);
    signal.iter().zip(opened).map(|(s, o)| s - o).collect()
}

fn morphological(
    signal: &[f64],
    half_width: usize,
    combine: fn(f64, f64) -> f64,
    identity: f64,
) -> Vec<f64> {
    (0..signal.len())
        .map(|i| {
            let start = i.saturating_sub(half_width);
            let end = (i + half_width + 1).min(signal.len());
            signal[start..end].iter().copied().fold(identity, combine)
        })
        .collect()
}
