//! Grouping co-eluting elution peaks into isotope patterns.
//!
//! Elution peaks are indexed by their mean m/z and visited in order of
//! decreasing apex intensity. For every candidate charge the assembler walks
//! the theoretical isotopologue positions to the right of the seed, collects
//! the co-eluting peaks found there, and scores the observed intensities
//! against the averagine envelope for the implied monoisotopic mass. The best
//! charge wins the seed and consumes its members.

use serde::{Deserialize, Serialize};

use crate::detector::CancelToken;
use crate::error::FeatureFindingError;
use crate::helper_functions::cosine_similarity;
use crate::isotopes::{cached_envelope, ISOTOPE_SPACING, PROTON_MASS};
use crate::model::FeatureFindingParams;
use crate::system::da;
use crate::tolerance::Tolerance;
use crate::trace::MassTrace;

/// The score multiplier applied when the monoisotopic position is assumed to
/// sit one spacing left of the first observed trace, below the noise
const MONO_SHIFT_PENALTY: f64 = 0.9;

/// A set of elution peaks assigned to consecutive positions of a theoretical
/// isotope envelope at an integer charge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IsotopePattern {
    /// The assigned charge
    pub charge: usize,
    /// The member traces, ordered by isotope position (index 0 is the first
    /// observed position)
    pub traces: Vec<MassTrace>,
    /// The envelope fit score in [0, 1]
    pub fit_score: f64,
    /// The mean boundary overlap of the members with the seed, in [0, 1]
    pub coelution_score: f64,
    /// The length of the averagine envelope the pattern was scored against
    pub predicted_len: usize,
    /// Whether the true monoisotopic position is predicted to sit one
    /// spacing left of the first observed trace
    pub mono_shift: bool,
}

impl IsotopePattern {
    /// The summed intensity over all member traces
    pub fn intensity_sum(&self) -> f64 {
        self.traces.iter().map(MassTrace::intensity_sum).sum()
    }
}

/// The best charge assignment found for one seed
struct Candidate {
    charge: usize,
    members: Vec<usize>,
    score: f64,
    intensity_sum: f64,
    coelution: f64,
    predicted_len: usize,
    mono_shift: bool,
}

impl Candidate {
    /// Ranking: fit score times intensity wins, ties go to the higher
    /// intensity sum, then to the lower charge
    fn beats(&self, other: &Self) -> bool {
        let weight = self.score * self.intensity_sum;
        let other_weight = other.score * other.intensity_sum;
        weight > other_weight
            || (weight == other_weight
                && (self.intensity_sum > other.intensity_sum
                    || (self.intensity_sum == other.intensity_sum && self.charge < other.charge)))
    }
}

/// Assemble isotope patterns from elution peaks.
///
/// Peaks that end up in no pattern are dropped, unless singletons are allowed
/// in the parameters, in which case they are emitted as single trace charge
/// one patterns with a fit score of zero.
///
/// # Errors
/// [`FeatureFindingError::Cancelled`] when the token fires. Numerical trouble
/// in the envelope model skips the seed with a logged warning.
pub fn assemble_patterns(
    peaks: Vec<MassTrace>,
    params: &FeatureFindingParams,
    cancel: &CancelToken,
) -> Result<Vec<IsotopePattern>, FeatureFindingError> {
    // Index by mean m/z for range queries
    let mut by_mz: Vec<usize> = (0..peaks.len()).collect();
    by_mz.sort_unstable_by(|a, b| {
        peaks[*a]
            .centroid_mz()
            .value
            .total_cmp(&peaks[*b].centroid_mz().value)
    });
    let sorted_mzs: Vec<f64> = by_mz.iter().map(|i| peaks[*i].centroid_mz().value).collect();

    // Seeds in decreasing apex intensity, m/z as the deterministic tie break
    let mut seeds: Vec<usize> = (0..peaks.len()).collect();
    seeds.sort_unstable_by(|a, b| {
        peaks[*b]
            .apex()
            .intensity
            .total_cmp(&peaks[*a].apex().intensity)
            .then(peaks[*a].centroid_mz().value.total_cmp(&peaks[*b].centroid_mz().value))
    });

    let mut consumed = vec![false; peaks.len()];
    let mut patterns = Vec::new();

    for &seed in &seeds {
        cancel.check()?;
        if consumed[seed] {
            continue;
        }

        let mut best: Option<Candidate> = None;
        let mut numerical_trouble = false;
        for charge in params.charge_range.min..=params.charge_range.max {
            match score_charge(&peaks, &by_mz, &sorted_mzs, &consumed, params, seed, charge) {
                Ok(Some(candidate)) => {
                    if candidate.score >= params.iso_min_score
                        && best.as_ref().map_or(true, |current| candidate.beats(current))
                    {
                        best = Some(candidate);
                    }
                }
                Ok(None) => (),
                Err(error) => {
                    log::warn!(
                        "skipping seed at m/z {:.4}: {error}",
                        peaks[seed].centroid_mz().value
                    );
                    numerical_trouble = true;
                    break;
                }
            }
        }
        if numerical_trouble {
            consumed[seed] = true;
            continue;
        }

        if let Some(candidate) = best {
            for &member in &candidate.members {
                consumed[member] = true;
            }
            patterns.push(IsotopePattern {
                charge: candidate.charge,
                traces: candidate.members.iter().map(|i| peaks[*i].clone()).collect(),
                fit_score: candidate.score,
                coelution_score: candidate.coelution,
                predicted_len: candidate.predicted_len,
                mono_shift: candidate.mono_shift,
            });
        } else {
            consumed[seed] = true;
            if params.allow_singletons {
                patterns.push(IsotopePattern {
                    charge: 1,
                    traces: vec![peaks[seed].clone()],
                    fit_score: 0.0,
                    coelution_score: 1.0,
                    predicted_len: 1,
                    mono_shift: false,
                });
            }
        }
    }

    log::debug!("assembled {} isotope patterns from {} elution peaks", patterns.len(), peaks.len());
    Ok(patterns)
}

/// Walk the isotopologue positions for one seed at one charge and score the
/// collected members against the averagine envelope. Returns [`None`] when no
/// sibling is found or the observed intensities cannot be scored.
#[allow(clippy::too_many_arguments)]
fn score_charge(
    peaks: &[MassTrace],
    by_mz: &[usize],
    sorted_mzs: &[f64],
    consumed: &[bool],
    params: &FeatureFindingParams,
    seed: usize,
    charge: usize,
) -> Result<Option<Candidate>, FeatureFindingError> {
    let mz0 = peaks[seed].centroid_mz().value;
    let mono_mass = (mz0 - PROTON_MASS) * charge as f64;
    if mono_mass <= 0.0 {
        return Ok(None);
    }
    let envelope = cached_envelope(&params.averagine, da(mono_mass))?;

    let mut members = vec![seed];
    for position in 1..envelope.len() {
        let expected = mz0 + ISOTOPE_SPACING * position as f64 / charge as f64;
        let found = find_coeluting(
            peaks, by_mz, sorted_mzs, consumed, params, seed, &members, expected,
        );
        match found {
            Some(index) => members.push(index),
            None => break,
        }
    }
    if members.len() < 2 {
        return Ok(None);
    }

    let observed: Vec<f64> = members.iter().map(|i| peaks[*i].intensity_sum()).collect();
    let predicted = &envelope[..members.len()];
    let Some(mut score) = cosine_similarity(&observed, predicted) else {
        return Ok(None);
    };

    // When the model expects a clearly stronger first position than observed,
    // test the hypothesis that the true monoisotopic peak sits one position
    // to the left, below the noise
    let mut mono_shift = false;
    let observed_total: f64 = observed.iter().sum();
    let predicted_total: f64 = predicted.iter().sum();
    if envelope.len() > members.len()
        && predicted[0] / predicted_total > observed[0] / observed_total
    {
        if let Some(shifted) = cosine_similarity(&observed, &envelope[1..=members.len()]) {
            let shifted = shifted * MONO_SHIFT_PENALTY;
            if shifted > score {
                score = shifted;
                mono_shift = true;
            }
        }
    }

    let coelution = members[1..]
        .iter()
        .map(|i| overlap_fraction(&peaks[seed], &peaks[*i]))
        .sum::<f64>()
        / (members.len() - 1) as f64;

    Ok(Some(Candidate {
        charge,
        intensity_sum: observed_total,
        members,
        score,
        coelution,
        predicted_len: envelope.len(),
        mono_shift,
    }))
}

/// The unconsumed peak nearest to the expected m/z that co-elutes with the
/// seed: apex retention times within the tolerance and boundary spans
/// overlapping far enough
#[allow(clippy::too_many_arguments)]
fn find_coeluting(
    peaks: &[MassTrace],
    by_mz: &[usize],
    sorted_mzs: &[f64],
    consumed: &[bool],
    params: &FeatureFindingParams,
    seed: usize,
    members: &[usize],
    expected: f64,
) -> Option<usize> {
    let (low, high) = match &params.tolerance {
        Tolerance::ppm(ppm) => {
            let offset = expected * ppm.into_inner() / 1e6;
            (expected - offset, expected + offset)
        }
        Tolerance::Abs(tolerance) => (expected - tolerance.value, expected + tolerance.value),
    };
    let start = sorted_mzs.partition_point(|mz| *mz < low);
    let end = sorted_mzs.partition_point(|mz| *mz <= high);

    (start..end)
        .map(|slot| by_mz[slot])
        .filter(|index| !consumed[*index] && !members.contains(index))
        .filter(|index| {
            let candidate = &peaks[*index];
            let apex_gap = (candidate.apex().rt.value - peaks[seed].apex().rt.value).abs();
            apex_gap < params.rt_tolerance.value
                && overlap_fraction(&peaks[seed], candidate) >= params.coelution_overlap
        })
        .min_by(|a, b| {
            let dist_a = (peaks[*a].centroid_mz().value - expected).abs();
            let dist_b = (peaks[*b].centroid_mz().value - expected).abs();
            dist_a.total_cmp(&dist_b)
        })
}

/// The overlap of the two retention time spans as a fraction of the shorter
/// span, so a narrow peak fully inside a wide one counts as full overlap
fn overlap_fraction(a: &MassTrace, b: &MassTrace) -> f64 {
    let overlap = a.end_rt().value.min(b.end_rt().value) - a.start_rt().value.max(b.start_rt().value);
    let shorter = a.rt_span().value.min(b.rt_span().value);
    if shorter <= 0.0 {
        if overlap >= 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (overlap / shorter).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{seconds, th};
    use crate::trace::TraceEntry;

    /// A Gaussian elution peak at the given m/z, scaled to the given height
    fn elution_peak(mz: f64, height: f64, center: f64) -> MassTrace {
        MassTrace::new(
            (0..15)
                .map(|i| {
                    let rt = center - 7.0 + f64::from(i);
                    TraceEntry {
                        spectrum_index: i as usize,
                        rt: seconds(rt),
                        mz: th(mz),
                        intensity: height * (-(rt - center).powi(2) / 18.0).exp(),
                    }
                })
                .collect(),
        )
        .unwrap()
    }

    fn charges(patterns: &[IsotopePattern]) -> Vec<usize> {
        patterns.iter().map(|p| p.charge).collect()
    }

    #[test]
    fn assembles_a_doubly_charged_pair() {
        let peaks = vec![
            elution_peak(750.3800, 5e5, 207.0),
            elution_peak(750.3800 + ISOTOPE_SPACING / 2.0, 3e5, 207.0),
        ];
        let params = FeatureFindingParams::default().tolerance(Tolerance::new_ppm(10.0));
        let patterns = assemble_patterns(peaks, &params, &CancelToken::default()).unwrap();
        assert_eq!(charges(&patterns), vec![2]);
        assert_eq!(patterns[0].traces.len(), 2);
        assert!(patterns[0].fit_score >= 0.75);
        assert!(patterns[0].coelution_score > 0.99);
    }

    #[test]
    fn charge_follows_the_spacing() {
        let peaks = vec![
            elution_peak(750.3800, 5e5, 207.0),
            elution_peak(750.3800 + ISOTOPE_SPACING, 3e5, 207.0),
        ];
        let params = FeatureFindingParams::default().tolerance(Tolerance::new_ppm(10.0));
        let patterns = assemble_patterns(peaks, &params, &CancelToken::default()).unwrap();
        assert_eq!(charges(&patterns), vec![1]);
    }

    #[test]
    fn lone_peaks_need_the_singleton_fallback() {
        let peaks = || {
            vec![
                elution_peak(400.1, 1e6, 105.0),
                elution_peak(600.4, 8e5, 105.0),
            ]
        };
        let strict = FeatureFindingParams::default();
        assert!(assemble_patterns(peaks(), &strict, &CancelToken::default())
            .unwrap()
            .is_empty());

        let lenient = FeatureFindingParams::default().allow_singletons(true);
        let patterns = assemble_patterns(peaks(), &lenient, &CancelToken::default()).unwrap();
        assert_eq!(charges(&patterns), vec![1, 1]);
        assert!(patterns.iter().all(|p| p.traces.len() == 1));
    }

    #[test]
    fn separated_elution_does_not_coelute() {
        // Right spacing, but eluting a minute apart
        let peaks = vec![
            elution_peak(750.3800, 5e5, 207.0),
            elution_peak(750.3800 + ISOTOPE_SPACING / 2.0, 3e5, 267.0),
        ];
        let params = FeatureFindingParams::default();
        let patterns = assemble_patterns(peaks, &params, &CancelToken::default()).unwrap();
        assert!(patterns.is_empty());
    }

    #[test]
    fn cancellation_propagates() {
        let cancel = CancelToken::default();
        cancel.cancel();
        let result = assemble_patterns(
            vec![elution_peak(400.1, 1e6, 105.0)],
            &FeatureFindingParams::default(),
            &cancel,
        );
        assert!(matches!(result, Err(FeatureFindingError::Cancelled)));
    }
}
