//! Seed and extend mass trace detection over an experiment.

use std::collections::VecDeque;

use crate::detector::CancelToken;
use crate::error::FeatureFindingError;
use crate::model::{FeatureFindingParams, NoiseThreshold, TraceTermination};
use crate::noise::{NoiseMap, DEFAULT_MZ_NOISE_WINDOW};
use crate::spectrum::{Experiment, Spectrum};
use crate::system::{th, MassOverCharge};
use crate::tolerance::Tolerance;
use crate::trace::{MassTrace, TraceEntry};

/// The minimum number of MS1 spectra needed before trace detection makes sense
const MIN_SPECTRA_FOR_DETECTION: usize = 3;

/// Detect mass traces in the MS1 spectra of an experiment.
///
/// Every unconsumed centroid, visited in order of decreasing intensity, seeds
/// a candidate trace that is extended forward and backward in retention time.
/// In each neighbouring spectrum the centroid nearest to the running
/// intensity weighted m/z centre within the tolerance is appended, and the
/// centre is updated after every append. Extension stops when the configured
/// termination criterion fires; the candidate is accepted when it is long
/// enough and sampled densely enough, which consumes its centroids.
///
/// The result is ordered by decreasing apex intensity. There is no guarantee
/// of any m/z ordering.
///
/// # Errors
/// [`FeatureFindingError::InvalidParameter`] on a non positive tolerance,
/// [`FeatureFindingError::MalformedInput`] when the MS1 retention times are
/// not strictly increasing, and [`FeatureFindingError::Cancelled`] when the
/// token fires.
pub fn detect_traces(
    experiment: &Experiment,
    params: &FeatureFindingParams,
    noise: Option<&NoiseMap>,
    cancel: &CancelToken,
) -> Result<Vec<MassTrace>, FeatureFindingError> {
    validate_tolerance(&params.tolerance)?;

    let ms1 = experiment.ms1_indices();
    for pair in ms1.windows(2) {
        if experiment[pair[1]].rt.value <= experiment[pair[0]].rt.value {
            return Err(FeatureFindingError::malformed(
                Some(pair[1]),
                "MS1 retention times must be strictly increasing",
            ));
        }
    }
    if ms1.len() < MIN_SPECTRA_FOR_DETECTION {
        return Ok(Vec::new());
    }

    // The noise map is only needed for automatic thresholds; build one locally
    // when the caller did not supply it
    let built_noise;
    let noise = match (&params.noise_threshold, noise) {
        (NoiseThreshold::Auto { .. }, None) => {
            built_noise = NoiseMap::from_experiment(experiment, DEFAULT_MZ_NOISE_WINDOW)?;
            Some(&built_noise)
        }
        (_, supplied) => supplied,
    };

    let median_period = median_scan_period(experiment, &ms1);
    let seeds = collect_seeds(experiment, &ms1, &params.noise_threshold, noise);

    let mut consumed: Vec<Vec<bool>> = ms1
        .iter()
        .map(|index| vec![false; experiment[*index].len()])
        .collect();
    let mut traces = Vec::new();

    for seed in &seeds {
        cancel.check()?;
        if consumed[seed.position][seed.peak] {
            continue;
        }

        let collected = extend_seed(experiment, &ms1, &consumed, params, seed);

        // Acceptance: long enough, and densely enough sampled over its span
        if collected.len() < params.min_trace_length {
            continue;
        }
        let first = &experiment[ms1[collected[0].0]];
        let last = &experiment[ms1[collected[collected.len() - 1].0]];
        let expected_scans = (last.rt.value - first.rt.value) / median_period + 1.0;
        if (collected.len() as f64) < params.min_sample_rate * expected_scans {
            continue;
        }

        let entries = collected
            .iter()
            .map(|(position, peak)| {
                let spectrum = &experiment[ms1[*position]];
                TraceEntry {
                    spectrum_index: ms1[*position],
                    rt: spectrum.rt,
                    mz: spectrum[*peak].mz,
                    intensity: spectrum[*peak].intensity.into_inner(),
                }
            })
            .collect();
        if let Some(trace) = MassTrace::new(entries) {
            for (position, peak) in &collected {
                consumed[*position][*peak] = true;
            }
            traces.push(trace);
        }
    }

    traces.sort_unstable_by(|a, b| {
        b.apex()
            .intensity
            .total_cmp(&a.apex().intensity)
            .then(a.centroid_mz().value.total_cmp(&b.centroid_mz().value))
            .then(a.start_rt().value.total_cmp(&b.start_rt().value))
    });
    if let Some(limit) = params.max_traces {
        traces.truncate(limit);
    }
    log::debug!("detected {} mass traces from {} seeds", traces.len(), seeds.len());
    Ok(traces)
}

fn validate_tolerance(tolerance: &Tolerance<MassOverCharge>) -> Result<(), FeatureFindingError> {
    let valid = match tolerance {
        Tolerance::ppm(value) => value.into_inner() > 0.0,
        Tolerance::Abs(value) => value.value > 0.0,
    };
    if valid {
        Ok(())
    } else {
        Err(FeatureFindingError::invalid_parameter(
            "mz_tolerance",
            "must be positive",
        ))
    }
}

/// A candidate starting point: one centroid addressed by its position in the
/// MS1 sequence and its peak index
struct Seed {
    position: usize,
    peak: usize,
    mz: f64,
    rt: f64,
    intensity: f64,
}

/// Enumerate the seed candidates above the noise threshold, ordered by
/// decreasing intensity with m/z then retention time as tie breaks
fn collect_seeds(
    experiment: &Experiment,
    ms1: &[usize],
    threshold: &NoiseThreshold,
    noise: Option<&NoiseMap>,
) -> Vec<Seed> {
    let mut seeds = Vec::new();
    for (position, index) in ms1.iter().enumerate() {
        let spectrum = &experiment[*index];
        for (peak, centroid) in spectrum.peaks().enumerate() {
            let intensity = centroid.intensity.into_inner();
            let floor = match threshold {
                NoiseThreshold::Off => 0.0,
                NoiseThreshold::Absolute(value) => *value,
                NoiseThreshold::Auto { sn } => {
                    sn * noise.map_or(1.0, |n| n.noise_at(*index, centroid.mz.value))
                }
            };
            if intensity > floor {
                seeds.push(Seed {
                    position,
                    peak,
                    mz: centroid.mz.value,
                    rt: spectrum.rt.value,
                    intensity,
                });
            }
        }
    }
    seeds.sort_unstable_by(|a, b| {
        b.intensity
            .total_cmp(&a.intensity)
            .then(a.mz.total_cmp(&b.mz))
            .then(a.rt.total_cmp(&b.rt))
    });
    seeds
}

/// Walk a seed forward then backward through the MS1 sequence, collecting the
/// matched (position, peak index) pairs in retention time order
fn extend_seed(
    experiment: &Experiment,
    ms1: &[usize],
    consumed: &[Vec<bool>],
    params: &FeatureFindingParams,
    seed: &Seed,
) -> VecDeque<(usize, usize)> {
    let mut collected = VecDeque::new();
    collected.push_back((seed.position, seed.peak));
    let mut total_weight = seed.intensity;
    let mut weighted_mz = seed.mz * seed.intensity;
    let mut centre = seed.mz;

    for forward in [true, false] {
        let positions: Box<dyn Iterator<Item = usize>> = if forward {
            Box::new(seed.position + 1..ms1.len())
        } else {
            Box::new((0..seed.position).rev())
        };
        let mut matched = 1_usize;
        let mut traversed = 1_usize;
        let mut consecutive_misses = 0_usize;
        for position in positions {
            traversed += 1;
            let spectrum = &experiment[ms1[position]];
            match closest_unconsumed(spectrum, &consumed[position], th(centre), &params.tolerance) {
                Some(peak) => {
                    if forward {
                        collected.push_back((position, peak));
                    } else {
                        collected.push_front((position, peak));
                    }
                    let intensity = spectrum[peak].intensity.into_inner();
                    total_weight += intensity;
                    weighted_mz += spectrum[peak].mz.value * intensity;
                    if total_weight > 0.0 {
                        centre = weighted_mz / total_weight;
                    }
                    matched += 1;
                    consecutive_misses = 0;
                }
                None => {
                    consecutive_misses += 1;
                    let stop = match params.termination {
                        TraceTermination::Outlier { max_consecutive } => {
                            consecutive_misses >= max_consecutive
                        }
                        TraceTermination::SampleRate => {
                            (matched as f64) / (traversed as f64) < params.min_sample_rate
                        }
                    };
                    if stop {
                        break;
                    }
                }
            }
        }
    }
    collected
}

/// The unconsumed peak nearest to the query within tolerance; distance ties go
/// to the higher intensity
fn closest_unconsumed(
    spectrum: &Spectrum,
    consumed: &[bool],
    query: MassOverCharge,
    tolerance: &Tolerance<MassOverCharge>,
) -> Option<usize> {
    let (low, high) = tolerance.bounds(query);
    spectrum
        .range_indices(low, high)
        .filter(|peak| !consumed[*peak])
        .min_by(|a, b| {
            let da = (spectrum[*a].mz.value - query.value).abs();
            let db = (spectrum[*b].mz.value - query.value).abs();
            da.total_cmp(&db)
                .then(spectrum[*b].intensity.cmp(&spectrum[*a].intensity))
        })
}

/// The median time between successive MS1 scans
fn median_scan_period(experiment: &Experiment, ms1: &[usize]) -> f64 {
    let mut periods: Vec<f64> = ms1
        .windows(2)
        .map(|pair| experiment[pair[1]].rt.value - experiment[pair[0]].rt.value)
        .collect();
    crate::helper_functions::median_in_place(&mut periods).unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureFindingParams;
    use crate::spectrum::CentroidPeak;
    use crate::system::seconds;

    /// An experiment with one persistent ion and some one off noise peaks
    fn single_ion_experiment() -> Experiment {
        let mut experiment = Experiment::new();
        for scan in 0..10 {
            let rt = 100.0 + f64::from(scan);
            let mut spectrum = Spectrum::new(seconds(rt), 1);
            spectrum.add_peak(CentroidPeak::new(th(500.0), 1000.0 + f64::from(scan) * 10.0));
            if scan == 4 {
                spectrum.add_peak(CentroidPeak::new(th(321.1), 50.0));
            }
            experiment.push(spectrum);
        }
        experiment
    }

    #[test]
    fn detects_a_single_persistent_ion() {
        let traces = detect_traces(
            &single_ion_experiment(),
            &FeatureFindingParams::default(),
            None,
            &CancelToken::default(),
        )
        .unwrap();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.len(), 10);
        assert!((trace.centroid_mz().value - 500.0).abs() < 1e-9);
        // The one off peak is too short to form a trace
    }

    #[test]
    fn rejects_non_monotonic_retention_times() {
        let mut experiment = Experiment::new();
        experiment.push(Spectrum::new(seconds(10.0), 1));
        experiment.push(Spectrum::new(seconds(11.0), 1));
        experiment.push(Spectrum::new(seconds(11.0), 1));
        let result = detect_traces(
            &experiment,
            &FeatureFindingParams::default(),
            None,
            &CancelToken::default(),
        );
        assert!(matches!(
            result,
            Err(FeatureFindingError::MalformedInput {
                spectrum_index: Some(2),
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let params = FeatureFindingParams::default().tolerance(Tolerance::new_ppm(0.0));
        let result = detect_traces(
            &single_ion_experiment(),
            &params,
            None,
            &CancelToken::default(),
        );
        assert!(matches!(result, Err(FeatureFindingError::InvalidParameter { .. })));
    }

    #[test]
    fn outlier_budget_splits_interrupted_elution() {
        // The ion vanishes for eight scans in the middle: with an outlier
        // budget of five this must yield two traces
        let mut experiment = Experiment::new();
        for scan in 0..28 {
            let rt = 100.0 + f64::from(scan);
            let mut spectrum = Spectrum::new(seconds(rt), 1);
            if !(10..18).contains(&scan) {
                spectrum.add_peak(CentroidPeak::new(th(500.0), 1000.0));
            }
            experiment.push(spectrum);
        }
        let traces = detect_traces(
            &experiment,
            &FeatureFindingParams::default(),
            None,
            &CancelToken::default(),
        )
        .unwrap();
        assert_eq!(traces.len(), 2);
        assert!(traces.iter().all(|t| t.len() == 10));
    }

    #[test]
    fn absolute_noise_threshold_blocks_seeding() {
        let params =
            FeatureFindingParams::default().noise_threshold(NoiseThreshold::Absolute(5000.0));
        let traces = detect_traces(
            &single_ion_experiment(),
            &params,
            None,
            &CancelToken::default(),
        )
        .unwrap();
        assert!(traces.is_empty());
    }

    #[test]
    fn max_traces_truncates_by_intensity() {
        let mut experiment = Experiment::new();
        for scan in 0..10 {
            let rt = 100.0 + f64::from(scan);
            let mut spectrum = Spectrum::new(seconds(rt), 1);
            spectrum.add_peak(CentroidPeak::new(th(500.0), 1000.0));
            spectrum.add_peak(CentroidPeak::new(th(600.0), 9000.0));
            experiment.push(spectrum);
        }
        let params = FeatureFindingParams::default().max_traces(Some(1));
        let traces = detect_traces(&experiment, &params, None, &CancelToken::default()).unwrap();
        assert_eq!(traces.len(), 1);
        assert!((traces[0].centroid_mz().value - 600.0).abs() < 1e-9);
    }

    #[test]
    fn cancellation_aborts_the_walk() {
        let cancel = CancelToken::default();
        cancel.cancel();
        let result = detect_traces(
            &single_ion_experiment(),
            &FeatureFindingParams::default(),
            None,
            &cancel,
        );
        assert!(matches!(result, Err(FeatureFindingError::Cancelled)));
    }
}
