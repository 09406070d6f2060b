//! Splitting mass traces into elution peaks.
//!
//! A mass trace can span more than one chromatographic elution of the same
//! ion. The splitter smooths each trace along retention time with a Gaussian
//! kernel, finds the local maxima that clear the signal to noise threshold,
//! and cuts the trace at the intensity minima between consecutive maxima.
//! Each cut produces an independent trace carrying only its own centroids.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::detector::CancelToken;
use crate::error::FeatureFindingError;
use crate::filtering::{Filter1D, FWHM_TO_SIGMA};
use crate::helper_functions::{median_in_place, quantile_sorted};
use crate::model::{FeatureFindingParams, WidthFiltering};
use crate::noise::NoiseMap;
use crate::trace::MassTrace;

/// Split every input trace into zero or more elution peaks.
///
/// Traces too short for the smoothing kernel pass through unchanged; traces
/// with no maximum above `chrom_peak_snr` times the noise floor are dropped.
/// A trace on which smoothing fails numerically is skipped with a logged
/// warning. When elution splitting is disabled in the parameters every trace
/// passes through as a single peak.
///
/// # Errors
/// [`FeatureFindingError::Cancelled`] when the token fires,
/// [`FeatureFindingError::InvalidParameter`] on a non positive `chrom_fwhm`.
pub fn split_traces(
    traces: Vec<MassTrace>,
    params: &FeatureFindingParams,
    noise: Option<&NoiseMap>,
    cancel: &CancelToken,
) -> Result<Vec<MassTrace>, FeatureFindingError> {
    if !params.enable_elution_splitting {
        return Ok(traces);
    }
    if !(params.chrom_fwhm.value > 0.0 && params.chrom_fwhm.value.is_finite()) {
        return Err(FeatureFindingError::invalid_parameter(
            "chrom_fwhm",
            "must be a positive finite number",
        ));
    }

    let input = traces.len();
    let split: Vec<MassTrace> = split_all(traces, params, noise, cancel)?
        .into_iter()
        .flatten()
        .collect();
    log::debug!("split {} traces into {} elution peaks", input, split.len());

    Ok(filter_widths(split, &params.width_filtering))
}

/// Run the per trace splitting, in parallel when allowed and available
fn split_all(
    traces: Vec<MassTrace>,
    params: &FeatureFindingParams,
    noise: Option<&NoiseMap>,
    cancel: &CancelToken,
) -> Result<Vec<Vec<MassTrace>>, FeatureFindingError> {
    #[cfg(feature = "rayon")]
    if !params.deterministic_order {
        cancel.check()?;
        return Ok(traces
            .into_par_iter()
            .map(|trace| split_one(trace, params, noise))
            .collect());
    }

    let mut output = Vec::with_capacity(traces.len());
    for trace in traces {
        cancel.check()?;
        output.push(split_one(trace, params, noise));
    }
    Ok(output)
}

/// Split one trace at the smoothed intensity minima between its maxima
fn split_one(
    mut trace: MassTrace,
    params: &FeatureFindingParams,
    noise: Option<&NoiseMap>,
) -> Vec<MassTrace> {
    let n = trace.len();
    let rts = trace.rts();
    let intensities = trace.intensities();

    let mut periods: Vec<f64> = rts.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let median_period = median_in_place(&mut periods).unwrap_or(1.0);
    let sigma = params.chrom_fwhm.value / FWHM_TO_SIGMA;
    let kernel_radius = (3.0 * sigma / median_period).ceil() as usize;
    if n < 2 * kernel_radius + 1 {
        // Too short to smooth meaningfully: a single elution peak as is
        return vec![trace];
    }

    let smoothed = match (Filter1D::Gaussian {
        fwhm: params.chrom_fwhm.value,
    })
    .apply(&rts, &intensities)
    {
        Ok(smoothed) => smoothed,
        Err(error) => {
            log::warn!(
                "skipping trace at m/z {:.4}: {error}",
                trace.centroid_mz().value
            );
            return Vec::new();
        }
    };

    let maxima: Vec<usize> = (1..n - 1)
        .filter(|i| {
            let floor = noise.map_or(1.0, |map| {
                let entry = &trace.entries()[*i];
                map.noise_at(entry.spectrum_index, entry.mz.value)
            });
            smoothed[*i] > smoothed[i - 1]
                && smoothed[*i] >= smoothed[i + 1]
                && smoothed[*i] > params.chrom_peak_snr * floor
        })
        .collect();
    if maxima.is_empty() {
        return Vec::new();
    }

    // Cut points: the argmin of the smoothed signal between consecutive maxima
    let mut cuts = vec![0];
    for pair in maxima.windows(2) {
        if let Some(cut) = (pair[0] + 1..pair[1])
            .min_by(|a, b| smoothed[*a].total_cmp(&smoothed[*b]))
        {
            cuts.push(cut);
        }
    }
    cuts.push(n);
    trace.set_smoothed(smoothed);

    cuts.windows(2)
        .filter_map(|pair| trace.sub_trace(pair[0]..pair[1]))
        .filter(|sub| sub.len() >= 3)
        .collect()
}

/// Drop elution peaks whose estimated width falls outside the accepted range
fn filter_widths(peaks: Vec<MassTrace>, filtering: &WidthFiltering) -> Vec<MassTrace> {
    match filtering {
        WidthFiltering::Off => peaks,
        WidthFiltering::Fixed { min, max } => peaks
            .into_iter()
            .filter(|peak| {
                let fwhm = peak.fwhm().value;
                fwhm >= min.value && fwhm <= max.value
            })
            .collect(),
        WidthFiltering::Auto => {
            let mut widths: Vec<f64> = peaks.iter().map(|peak| peak.fwhm().value).collect();
            widths.sort_unstable_by(f64::total_cmp);
            let (Some(lower), Some(upper)) = (
                quantile_sorted(&widths, 0.05),
                quantile_sorted(&widths, 0.95),
            ) else {
                return peaks;
            };
            let before = peaks.len();
            let kept: Vec<MassTrace> = peaks
                .into_iter()
                .filter(|peak| {
                    let fwhm = peak.fwhm().value;
                    fwhm >= lower && fwhm <= upper
                })
                .collect();
            if kept.len() < before {
                log::debug!("width filtering dropped {} elution peaks", before - kept.len());
            }
            kept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{CentroidPeak, Experiment, Spectrum};
    use crate::system::{seconds, th};
    use crate::trace::{detect_traces, TraceEntry};

    fn trace_from_profile(profile: impl Fn(f64) -> f64, start: f64, scans: usize) -> MassTrace {
        MassTrace::new(
            (0..scans)
                .map(|i| {
                    let rt = start + i as f64;
                    TraceEntry {
                        spectrum_index: i,
                        rt: seconds(rt),
                        mz: th(500.0),
                        intensity: profile(rt),
                    }
                })
                .collect(),
        )
        .unwrap()
    }

    fn gaussian(center: f64, sigma: f64, height: f64) -> impl Fn(f64) -> f64 {
        move |rt| height * (-(rt - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    #[test]
    fn a_single_hump_stays_one_peak() {
        let trace = trace_from_profile(gaussian(105.0, 3.0, 1e6), 95.0, 21);
        let params = FeatureFindingParams::default();
        let peaks = split_traces(vec![trace], &params, None, &CancelToken::default()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].len(), 21);
        assert!(peaks[0].smoothed().is_some());
    }

    #[test]
    fn a_double_hump_splits_in_two() {
        let humps = gaussian(105.0, 2.0, 1e6);
        let second = gaussian(115.0, 2.0, 8e5);
        let trace = trace_from_profile(move |rt| humps(rt) + second(rt), 95.0, 31);
        let params = FeatureFindingParams::default();
        let peaks = split_traces(vec![trace], &params, None, &CancelToken::default()).unwrap();
        assert_eq!(peaks.len(), 2);
        // The cut lies in the valley around 110 s
        assert!(peaks[0].end_rt().value <= 111.0);
        assert!(peaks[1].start_rt().value >= 109.0);
        // Apexes are interior and above both boundaries on the smoothed profile
        for peak in &peaks {
            let smoothed = peak.smoothed().unwrap();
            let apex = peak.apex_index();
            assert!(apex > 0 && apex < peak.len() - 1);
            assert!(smoothed[apex] > smoothed[0]);
            assert!(smoothed[apex] > smoothed[peak.len() - 1]);
        }
    }

    #[test]
    fn short_traces_pass_through_unchanged() {
        let trace = trace_from_profile(gaussian(102.0, 1.5, 1e5), 100.0, 5);
        let params = FeatureFindingParams::default();
        let peaks = split_traces(vec![trace], &params, None, &CancelToken::default()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].len(), 5);
        assert!(peaks[0].smoothed().is_none());
    }

    #[test]
    fn disabled_splitting_passes_everything_through() {
        let humps = gaussian(105.0, 2.0, 1e6);
        let second = gaussian(115.0, 2.0, 8e5);
        let trace = trace_from_profile(move |rt| humps(rt) + second(rt), 95.0, 31);
        let params = FeatureFindingParams::default().enable_elution_splitting(false);
        let peaks = split_traces(vec![trace], &params, None, &CancelToken::default()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].len(), 31);
    }

    #[test]
    fn flat_noise_trace_is_discarded() {
        // Constant low signal: no local maximum above the threshold
        let trace = trace_from_profile(|_| 2.0, 100.0, 40);
        let params = FeatureFindingParams::default();
        let peaks = split_traces(vec![trace], &params, None, &CancelToken::default()).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn fixed_width_filtering_drops_outliers() {
        let narrow = trace_from_profile(gaussian(110.0, 1.0, 1e6), 95.0, 31);
        let wide = trace_from_profile(gaussian(110.0, 6.0, 1e6), 95.0, 31);
        let params = FeatureFindingParams::default().width_filtering(WidthFiltering::Fixed {
            min: seconds(1.0),
            max: seconds(8.0),
        });
        let peaks = split_traces(vec![narrow, wide], &params, None, &CancelToken::default()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].fwhm().value < 8.0);
    }

    #[test]
    fn splitting_follows_trace_detection() {
        // End to end over the detector: one ion with two elution events
        let mut experiment = Experiment::new();
        let humps = gaussian(105.0, 2.0, 1e6);
        let second = gaussian(115.0, 2.0, 8e5);
        for scan in 0..31 {
            let rt = 95.0 + f64::from(scan);
            let mut spectrum = Spectrum::new(seconds(rt), 1);
            spectrum.add_peak(CentroidPeak::new(th(500.0), humps(rt) + second(rt)));
            experiment.push(spectrum);
        }
        let params = FeatureFindingParams::default();
        let cancel = CancelToken::default();
        let traces = detect_traces(&experiment, &params, None, &cancel).unwrap();
        assert_eq!(traces.len(), 1);
        let peaks = split_traces(traces, &params, None, &cancel).unwrap();
        assert_eq!(peaks.len(), 2);
    }
}
