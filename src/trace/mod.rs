//! Mass traces: m/z constant, retention time extended groups of centroids.

mod detection;

pub use detection::detect_traces;

use serde::{Deserialize, Serialize};

use crate::system::{th, MassOverCharge, Time};

/// One centroid captured into a mass trace, with the provenance needed to map
/// it back to the experiment.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TraceEntry {
    /// The index of the source spectrum in the experiment
    pub spectrum_index: usize,
    /// The retention time of the source spectrum
    pub rt: Time,
    /// The m/z of the captured centroid
    pub mz: MassOverCharge,
    /// The intensity of the captured centroid
    pub intensity: f64,
}

/// A mass trace: a sequence of centroids from successive scans sharing a
/// common m/z within tolerance, the one dimensional fingerprint of an ion as
/// it elutes. Entries are strictly increasing in retention time. The derived
/// statistics are computed once on construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MassTrace {
    entries: Vec<TraceEntry>,
    centroid_mz: MassOverCharge,
    mz_sd: MassOverCharge,
    apex: usize,
    centroid_rt: Time,
    fwhm: Time,
    intensity_sum: f64,
    /// The smoothed intensity profile, filled in by elution peak splitting
    smoothed: Option<Vec<f64>>,
}

impl MassTrace {
    /// Build a trace from its entries, computing all derived statistics.
    /// Returns [`None`] on an empty entry list.
    pub fn new(entries: Vec<TraceEntry>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        let total: f64 = entries.iter().map(|e| e.intensity).sum();
        let (centroid_mz, mz_sd) = if total > 0.0 {
            let mean = entries.iter().map(|e| e.mz.value * e.intensity).sum::<f64>() / total;
            let variance = entries
                .iter()
                .map(|e| e.intensity * (e.mz.value - mean).powi(2))
                .sum::<f64>()
                / total;
            (mean, variance.sqrt())
        } else {
            // A fully zero intensity trace: fall back to the plain mean
            let mean = entries.iter().map(|e| e.mz.value).sum::<f64>() / entries.len() as f64;
            (mean, 0.0)
        };
        let apex = entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.intensity.total_cmp(&b.intensity))
            .map(|(i, _)| i)?;
        let centroid_rt = if total > 0.0 {
            entries.iter().map(|e| e.rt.value * e.intensity).sum::<f64>() / total
        } else {
            entries[apex].rt.value
        };
        let fwhm = estimate_fwhm(&entries, apex);

        Some(Self {
            centroid_mz: th(centroid_mz),
            mz_sd: th(mz_sd),
            apex,
            centroid_rt: crate::system::seconds(centroid_rt),
            fwhm,
            intensity_sum: total,
            entries,
            smoothed: None,
        })
    }

    /// The number of captured centroids
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the trace holds no centroids (never true for a constructed trace)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in retention time order
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// The intensity weighted mean m/z of the captured centroids
    pub fn centroid_mz(&self) -> MassOverCharge {
        self.centroid_mz
    }

    /// The intensity weighted standard deviation of the captured m/z values
    pub fn mz_sd(&self) -> MassOverCharge {
        self.mz_sd
    }

    /// The index of the most intense entry
    pub fn apex_index(&self) -> usize {
        self.apex
    }

    /// The most intense entry
    pub fn apex(&self) -> &TraceEntry {
        &self.entries[self.apex]
    }

    /// The intensity weighted mean retention time
    pub fn centroid_rt(&self) -> Time {
        self.centroid_rt
    }

    /// The estimated full width at half maximum of the elution profile
    pub fn fwhm(&self) -> Time {
        self.fwhm
    }

    /// The summed intensity of all captured centroids, the per scan integral
    /// of the elution profile used for quantification
    pub fn intensity_sum(&self) -> f64 {
        self.intensity_sum
    }

    /// The retention time of the first entry
    pub fn start_rt(&self) -> Time {
        self.entries[0].rt
    }

    /// The retention time of the last entry
    pub fn end_rt(&self) -> Time {
        self.entries[self.entries.len() - 1].rt
    }

    /// The retention time span from first to last entry
    pub fn rt_span(&self) -> Time {
        self.end_rt() - self.start_rt()
    }

    /// The smoothed intensity profile, when elution peak splitting stored one
    pub fn smoothed(&self) -> Option<&[f64]> {
        self.smoothed.as_deref()
    }

    /// Attach a smoothed intensity profile (one value per entry)
    pub fn set_smoothed(&mut self, smoothed: Vec<f64>) {
        debug_assert_eq!(smoothed.len(), self.entries.len());
        self.smoothed = Some(smoothed);
    }

    /// Copy out the subrange `[start, end)` of this trace as a trace of its
    /// own, carrying the matching slice of the smoothed profile when present.
    /// Returns [`None`] on an empty range.
    pub fn sub_trace(&self, range: std::ops::Range<usize>) -> Option<Self> {
        let mut sub = Self::new(self.entries.get(range.clone())?.to_vec())?;
        if let Some(smoothed) = &self.smoothed {
            sub.smoothed = Some(smoothed[range].to_vec());
        }
        Some(sub)
    }

    /// The raw intensities as a plain vector
    pub fn intensities(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.intensity).collect()
    }

    /// The retention times as a plain vector
    pub fn rts(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.rt.value).collect()
    }
}

/// Estimate the full width at half maximum around the apex by linear
/// interpolation of the half maximum crossings, clamped to the trace borders
/// when the profile never drops that far.
fn estimate_fwhm(entries: &[TraceEntry], apex: usize) -> Time {
    let half = entries[apex].intensity / 2.0;

    let mut left = entries[0].rt.value;
    for i in (0..apex).rev() {
        if entries[i].intensity < half {
            let (x0, y0) = (entries[i].rt.value, entries[i].intensity);
            let (x1, y1) = (entries[i + 1].rt.value, entries[i + 1].intensity);
            left = if (y1 - y0).abs() > f64::EPSILON {
                x0 + (half - y0) / (y1 - y0) * (x1 - x0)
            } else {
                x0
            };
            break;
        }
    }

    let mut right = entries[entries.len() - 1].rt.value;
    for i in apex + 1..entries.len() {
        if entries[i].intensity < half {
            let (x0, y0) = (entries[i - 1].rt.value, entries[i - 1].intensity);
            let (x1, y1) = (entries[i].rt.value, entries[i].intensity);
            right = if (y1 - y0).abs() > f64::EPSILON {
                x0 + (half - y0) / (y1 - y0) * (x1 - x0)
            } else {
                x1
            };
            break;
        }
    }

    crate::system::seconds((right - left).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::seconds;

    fn entry(rt: f64, mz: f64, intensity: f64) -> TraceEntry {
        TraceEntry {
            spectrum_index: rt as usize,
            rt: seconds(rt),
            mz: th(mz),
            intensity,
        }
    }

    fn gaussian_trace(center: f64, sigma: f64, height: f64) -> MassTrace {
        MassTrace::new(
            (0..21)
                .map(|i| {
                    let rt = center - 10.0 + f64::from(i);
                    entry(rt, 500.0, height * (-(rt - center).powi(2) / (2.0 * sigma * sigma)).exp())
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn weighted_mean_mz_matches_definition() {
        let trace = MassTrace::new(vec![
            entry(1.0, 500.000, 100.0),
            entry(2.0, 500.002, 300.0),
        ])
        .unwrap();
        let expected = (500.000 * 100.0 + 500.002 * 300.0) / 400.0;
        assert!((trace.centroid_mz().value - expected).abs() < 1e-12);
        assert_eq!(trace.apex_index(), 1);
        assert!((trace.intensity_sum() - 400.0).abs() < 1e-12);
        // The weighted spread of two m/z values 2 mDa apart
        assert!(trace.mz_sd().value > 0.0 && trace.mz_sd().value < 0.002);
    }

    #[test]
    fn fwhm_of_a_gaussian_profile() {
        let trace = gaussian_trace(100.0, 3.0, 1e6);
        // FWHM of a sigma 3 Gaussian is about 7.06 seconds
        let fwhm = trace.fwhm().value;
        assert!((fwhm - 3.0 * crate::filtering::FWHM_TO_SIGMA).abs() < 0.2, "fwhm was {fwhm}");
    }

    #[test]
    fn sub_trace_recomputes_statistics() {
        let trace = gaussian_trace(100.0, 3.0, 1e6);
        let sub = trace.sub_trace(0..11).unwrap();
        assert_eq!(sub.len(), 11);
        assert_eq!(sub.apex_index(), 10);
        assert!(sub.intensity_sum() < trace.intensity_sum());
        assert!(trace.sub_trace(5..5).is_none());
    }

    #[test]
    fn zero_intensity_trace_falls_back_to_plain_mean() {
        let trace = MassTrace::new(vec![entry(1.0, 500.0, 0.0), entry(2.0, 500.002, 0.0)]).unwrap();
        assert!((trace.centroid_mz().value - 500.001).abs() < 1e-9);
    }
}
