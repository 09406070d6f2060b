//! Peak picking in targeted SRM/MRM chromatograms.
//!
//! The picker smooths the chromatogram, finds local maxima above the signal
//! to noise threshold, and turns each maximum into a picked peak with a
//! refined apex, boundaries, and a trapezoidal area over the raw samples.
//! Two refinement methods are available: a quadratic fit through the three
//! samples around the maximum (legacy) and cubic spline interpolation with
//! zero derivative apex placement (corrected).

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;
use crate::filtering::Filter1D;
use crate::helper_functions::trapezoid;
use crate::model::{MrmPickerParams, MrmSmoothing, PickerMethod};
use crate::noise::NoiseEstimator;
use crate::spectrum::Chromatogram;
use crate::spline::CubicSpline;
use crate::system::{seconds, Time};

/// One picked chromatographic peak
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct PickedPeak {
    /// The refined apex position
    pub apex_rt: Time,
    /// The interpolated intensity at the apex
    pub apex_intensity: f64,
    /// The trapezoidal integral of the raw intensity over the boundaries
    pub area: f64,
    /// The left boundary
    pub left_rt: Time,
    /// The right boundary
    pub right_rt: Time,
}

/// The picked peaks of one chromatogram, ordered by apex position
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PickedChromatogram {
    peaks: Vec<PickedPeak>,
}

impl PickedChromatogram {
    /// The picked peaks
    pub fn peaks(&self) -> &[PickedPeak] {
        &self.peaks
    }

    /// The integrated areas, one per peak
    pub fn integrated_areas(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.area).collect()
    }

    /// The left boundaries, one per peak
    pub fn left_boundaries(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.left_rt.value).collect()
    }

    /// The right boundaries, one per peak
    pub fn right_boundaries(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.right_rt.value).collect()
    }
}

/// Pick the peaks of a single chromatogram.
///
/// An empty chromatogram yields an empty result without an error. Every
/// returned peak satisfies `left < apex < right`, a positive area, and an
/// apex intensity above the signal to noise threshold.
///
/// # Errors
/// [`FeatureFindingError::MalformedInput`] when the retention times are not
/// strictly increasing, [`FeatureFindingError::InvalidParameter`] for
/// parameter domains, and [`FeatureFindingError::NumericalFailure`] when
/// smoothing or interpolation produce non finite values.
pub fn pick_chromatogram(
    chromatogram: &Chromatogram,
    params: &MrmPickerParams,
) -> Result<PickedChromatogram, FeatureFindingError> {
    params.validate()?;
    if chromatogram.is_empty() {
        return Ok(PickedChromatogram::default());
    }

    let rts = chromatogram.rts();
    let intensities = chromatogram.intensities();
    if let Some(position) = rts.windows(2).position(|pair| pair[1] <= pair[0]) {
        return Err(FeatureFindingError::malformed(
            Some(position + 1),
            "chromatogram retention times must be strictly increasing",
        ));
    }
    if rts.len() < 3 {
        return Ok(PickedChromatogram::default());
    }

    let filter = match params.smoothing {
        MrmSmoothing::Gaussian { fwhm } => Filter1D::Gaussian { fwhm: fwhm.value },
        MrmSmoothing::SavitzkyGolay { window, order } => Filter1D::SavitzkyGolay { window, order },
    };
    let smoothed = filter.apply(&rts, &intensities)?;
    let noise = NoiseEstimator::from_series(&rts, &intensities, params.noise_window.value)?;
    let raw_spline = CubicSpline::new(&rts, &intensities)?;

    let mut peaks = Vec::new();
    for i in 1..rts.len() - 1 {
        let floor = params.signal_to_noise * noise.noise_at(rts[i]);
        if !(smoothed[i] > smoothed[i - 1] && smoothed[i] >= smoothed[i + 1] && smoothed[i] > floor)
        {
            continue;
        }

        let (apex_rt, apex_intensity) = match params.method {
            PickerMethod::Legacy => quadratic_apex(&rts, &smoothed, i),
            PickerMethod::Corrected => {
                let smooth_spline = CubicSpline::new(&rts, &smoothed)?;
                let apex = smooth_spline
                    .derivative_root(rts[i - 1], rts[i + 1])
                    .unwrap_or(rts[i]);
                (apex, raw_spline.value(apex))
            }
        };

        let (left, right) = match params.method {
            PickerMethod::Legacy if params.peak_width > 0.0 => {
                let half = params.peak_width / 2.0;
                (
                    (apex_rt - half).max(rts[0]),
                    (apex_rt + half).min(rts[rts.len() - 1]),
                )
            }
            // Walk the smoothed profile outward to the first minimum or to
            // where the signal drops below the noise floor
            PickerMethod::Legacy | PickerMethod::Corrected => {
                boundary_walk(&smoothed, &rts, &noise, params.signal_to_noise, i)
            }
        };

        let range = index_range(&rts, left, right);
        let area = trapezoid(&rts[range.clone()], &intensities[range]);

        // Contract: a proper bracket, positive area, apex above the noise
        if left < apex_rt && apex_rt < right && area > 0.0 && apex_intensity > floor {
            peaks.push(PickedPeak {
                apex_rt: seconds(apex_rt),
                apex_intensity,
                area,
                left_rt: seconds(left),
                right_rt: seconds(right),
            });
        }
    }

    Ok(PickedChromatogram { peaks })
}

/// Pick a whole batch of chromatograms, in parallel when available.
///
/// # Errors
/// The first error of any single pick, see [`pick_chromatogram`].
pub fn pick_all(
    chromatograms: &[Chromatogram],
    params: &MrmPickerParams,
) -> Result<Vec<PickedChromatogram>, FeatureFindingError> {
    #[cfg(feature = "rayon")]
    {
        chromatograms
            .par_iter()
            .map(|chromatogram| pick_chromatogram(chromatogram, params))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        chromatograms
            .iter()
            .map(|chromatogram| pick_chromatogram(chromatogram, params))
            .collect()
    }
}

/// The vertex of the parabola through the three samples around a local
/// maximum, falling back to the centre sample for a degenerate fit
fn quadratic_apex(rts: &[f64], signal: &[f64], i: usize) -> (f64, f64) {
    let (x0, x1, x2) = (rts[i - 1], rts[i], rts[i + 1]);
    let (y0, y1, y2) = (signal[i - 1], signal[i], signal[i + 1]);
    let denominator = (x0 - x1) * (x0 - x2) * (x1 - x2);
    if denominator.abs() < f64::EPSILON {
        return (x1, y1);
    }
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denominator;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denominator;
    if a >= 0.0 {
        // Not a cap: keep the sample
        return (x1, y1);
    }
    let apex = -b / (2.0 * a);
    let c = y1 - a * x1 * x1 - b * x1;
    (apex, a * apex * apex + b * apex + c)
}

/// Walk outward from the apex until the signal starts rising again or drops
/// below the noise floor, returning the boundary positions
fn boundary_walk(
    signal: &[f64],
    rts: &[f64],
    noise: &NoiseEstimator,
    signal_to_noise: f64,
    apex: usize,
) -> (f64, f64) {
    let mut left = apex;
    while left > 0 {
        if signal[left - 1] >= signal[left] {
            break;
        }
        left -= 1;
        if signal[left] < signal_to_noise * noise.noise_at(rts[left]) {
            break;
        }
    }
    let mut right = apex;
    while right + 1 < signal.len() {
        if signal[right + 1] >= signal[right] {
            break;
        }
        right += 1;
        if signal[right] < signal_to_noise * noise.noise_at(rts[right]) {
            break;
        }
    }
    (rts[left], rts[right])
}

/// The inclusive sample range covered by the boundary positions
fn index_range(rts: &[f64], left: f64, right: f64) -> std::ops::Range<usize> {
    let start = rts.partition_point(|rt| *rt < left);
    let end = rts.partition_point(|rt| *rt <= right);
    start..end.max(start + 1).min(rts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MrmPickerParams;

    /// A simulated SRM transition pair; the two traces are not sampled at the
    /// exact same time points
    fn srm_chromatogram(i: usize) -> Chromatogram {
        let rt_1 = [
            1474.34, 1477.11, 1479.88, 1482.64, 1485.41, 1488.19, 1490.95, 1493.72, 1496.48,
            1499.25, 1502.03, 1504.8, 1507.56, 1510.33, 1513.09, 1515.87, 1518.64, 1521.42,
        ];
        let rt_2 = [
            1473.55, 1476.31, 1479.08, 1481.84, 1484.61, 1487.39, 1490.15, 1492.92, 1495.69,
            1498.45, 1501.23, 1504.0, 1506.76, 1509.53, 1512.29, 1515.07, 1517.84, 1520.62,
        ];
        let int_1 = [
            3.26958, 3.74189, 3.31075, 86.1901, 3.47528, 387.864, 13281.0, 6375.84, 39852.6,
            2.66726, 612.747, 3.34313, 793.12, 3.29156, 4.00586, 4.1591, 3.23035, 3.90591,
        ];
        let int_2 = [
            3.44054, 2142.31, 3.58763, 3076.97, 6663.55, 45681.0, 157694.0, 122844.0, 86034.7,
            85391.1, 15992.8, 2293.94, 6934.85, 2735.18, 459.413, 3.93863, 3.36564, 3.44005,
        ];
        if i == 0 {
            Chromatogram::from_points(rt_1.iter().zip(int_1).map(|(rt, int)| (seconds(*rt), int)))
        } else {
            Chromatogram::from_points(rt_2.iter().zip(int_2).map(|(rt, int)| (seconds(*rt), int)))
        }
    }

    #[test]
    fn corrected_method_picks_the_srm_transition() {
        let picked = pick_chromatogram(&srm_chromatogram(0), &MrmPickerParams::default()).unwrap();
        assert_eq!(picked.peaks().len(), 1);
        let peak = &picked.peaks()[0];
        assert!((1490.0..=1500.0).contains(&peak.apex_rt.value), "apex at {}", peak.apex_rt.value);
        assert!(peak.left_rt < peak.apex_rt && peak.apex_rt < peak.right_rt);
        assert!(peak.area > 0.0);

        let picked = pick_chromatogram(&srm_chromatogram(1), &MrmPickerParams::default()).unwrap();
        assert_eq!(picked.peaks().len(), 1);
        let peak = &picked.peaks()[0];
        assert!((1485.0..=1497.0).contains(&peak.apex_rt.value), "apex at {}", peak.apex_rt.value);
        // The bulk of the intensity must be integrated
        assert!(peak.area > 1e5);
    }

    #[test]
    fn legacy_method_with_a_fixed_peak_width() {
        let params = MrmPickerParams::default()
            .method(PickerMethod::Legacy)
            .peak_width(10.0);
        let picked = pick_chromatogram(&srm_chromatogram(0), &params).unwrap();
        assert_eq!(picked.peaks().len(), 1);
        let peak = &picked.peaks()[0];
        assert!((peak.right_rt.value - peak.left_rt.value - 10.0).abs() < 1e-9);
        assert!(peak.left_rt < peak.apex_rt && peak.apex_rt < peak.right_rt);
    }

    #[test]
    fn empty_chromatogram_yields_empty_output() {
        let picked =
            pick_chromatogram(&Chromatogram::default(), &MrmPickerParams::default()).unwrap();
        assert!(picked.peaks().is_empty());
    }

    #[test]
    fn non_monotonic_retention_times_are_rejected() {
        let chromatogram =
            Chromatogram::from_points([(seconds(1.0), 5.0), (seconds(1.0), 6.0), (seconds(2.0), 3.0)]);
        let result = pick_chromatogram(&chromatogram, &MrmPickerParams::default());
        assert!(matches!(result, Err(FeatureFindingError::MalformedInput { .. })));
    }

    #[test]
    fn meta_arrays_match_the_peaks() {
        let picked = pick_chromatogram(&srm_chromatogram(1), &MrmPickerParams::default()).unwrap();
        assert_eq!(picked.integrated_areas().len(), picked.peaks().len());
        assert_eq!(picked.left_boundaries().len(), picked.peaks().len());
        assert_eq!(picked.right_boundaries().len(), picked.peaks().len());
    }

    #[test]
    fn batch_picking_matches_single_picking() {
        let chromatograms = [srm_chromatogram(0), srm_chromatogram(1)];
        let batch = pick_all(&chromatograms, &MrmPickerParams::default()).unwrap();
        let single = pick_chromatogram(&chromatograms[1], &MrmPickerParams::default()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].peaks().len(), single.peaks().len());
    }
}
