//! The passive peak list shapes consumed by the pipeline: centroid peaks,
//! spectra, experiments, and chromatograms.
//!
//! Everything here is plain data. Spectra keep their peaks sorted ascending by
//! m/z so the detectors can run range queries; nothing in this module mutates a
//! centroid after intake.

use std::cmp::Ordering;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::system::{MassOverCharge, Time};
use crate::tolerance::{Tolerance, WithinTolerance};

/// A single centroided peak: an m/z position with a measured intensity.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct CentroidPeak {
    /// The mz value of this peak
    pub mz: MassOverCharge,
    /// The intensity of this peak
    pub intensity: OrderedFloat<f64>,
}

impl CentroidPeak {
    /// Create a new peak
    pub fn new(mz: MassOverCharge, intensity: f64) -> Self {
        Self {
            mz,
            intensity: intensity.into(),
        }
    }
}

impl PartialOrd for CentroidPeak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CentroidPeak {
    /// Use `f64::total_cmp` on `self.mz`
    fn cmp(&self, other: &Self) -> Ordering {
        self.mz.value.total_cmp(&other.mz.value)
    }
}

impl PartialEq for CentroidPeak {
    /// Use `f64::total_cmp` on all fields to detect total equality
    fn eq(&self, other: &Self) -> bool {
        self.mz.value.total_cmp(&other.mz.value) == Ordering::Equal
            && self.intensity.total_cmp(&other.intensity) == Ordering::Equal
    }
}

impl Eq for CentroidPeak {}

/// A single centroided spectrum: an ordered peak list at one retention time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Spectrum {
    /// The retention time at which this spectrum was acquired
    pub rt: Time,
    /// The MS level (1 for survey scans, 2 and up for fragmentation scans)
    pub ms_level: u8,
    /// The peaks, sorted ascending by m/z
    peaks: Vec<CentroidPeak>,
}

impl Spectrum {
    /// Create an empty spectrum at the given retention time and MS level
    pub fn new(rt: Time, ms_level: u8) -> Self {
        Self {
            rt,
            ms_level,
            peaks: Vec::new(),
        }
    }

    /// The number of peaks
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    /// Whether the spectrum holds no peaks
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Iterate over the peaks in ascending m/z order
    pub fn peaks(&self) -> std::slice::Iter<'_, CentroidPeak> {
        self.peaks.iter()
    }

    /// Add a single peak, keeping the list sorted
    pub fn add_peak(&mut self, peak: CentroidPeak) {
        let index = self.peaks.binary_search(&peak).unwrap_or_else(|i| i);
        self.peaks.insert(index, peak);
    }

    /// The most intense peak, if any
    pub fn base_peak(&self) -> Option<&CentroidPeak> {
        self.peaks.iter().max_by_key(|p| p.intensity)
    }

    /// The summed intensity of all peaks
    pub fn total_ion_current(&self) -> f64 {
        self.peaks.iter().map(|p| p.intensity.into_inner()).sum()
    }

    /// The index range of peaks with m/z in `[low, high]`
    pub fn range_indices(&self, low: MassOverCharge, high: MassOverCharge) -> std::ops::Range<usize> {
        let start = self
            .peaks
            .partition_point(|p| p.mz.value < low.value);
        let end = self
            .peaks
            .partition_point(|p| p.mz.value <= high.value);
        start..end.max(start)
    }

    /// The slice of peaks with m/z in `[low, high]`
    pub fn range(&self, low: MassOverCharge, high: MassOverCharge) -> &[CentroidPeak] {
        &self.peaks[self.range_indices(low, high)]
    }

    /// Find the peak closest to the query within the tolerance. The closest
    /// peak by absolute m/z distance wins; an exact distance tie goes to the
    /// higher intensity. Returns the index of the winner.
    pub fn search(&self, query: MassOverCharge, tolerance: Tolerance<MassOverCharge>) -> Option<usize> {
        let (low, high) = tolerance.bounds(query);
        let candidates = self.range_indices(low, high);
        candidates
            .min_by(|a, b| {
                let da = (self.peaks[*a].mz.value - query.value).abs();
                let db = (self.peaks[*b].mz.value - query.value).abs();
                da.total_cmp(&db)
                    .then(self.peaks[*b].intensity.cmp(&self.peaks[*a].intensity))
            })
            .filter(|index| tolerance.within(&self.peaks[*index].mz, &query))
    }

    /// Retain only peaks with an intensity above `threshold` times the maximal intensity.
    pub fn relative_noise_filter(&mut self, threshold: f64) {
        let max = self
            .peaks
            .iter()
            .map(|p| p.intensity.into_inner())
            .fold(f64::NEG_INFINITY, f64::max);
        self.peaks.retain(|p| p.intensity.into_inner() >= max * threshold);
        self.peaks.shrink_to_fit();
    }

    /// Retain only peaks with an intensity of at least `threshold`.
    pub fn absolute_noise_filter(&mut self, threshold: f64) {
        self.peaks.retain(|p| p.intensity.into_inner() >= threshold);
        self.peaks.shrink_to_fit();
    }

    /// Window mower: divide the m/z axis in windows of `window_size` and within
    /// each window keep only the `top` most intense peaks.
    pub fn top_x_filter(&mut self, window_size: f64, top: usize) {
        if self.peaks.is_empty() || window_size <= 0.0 {
            return;
        }
        let start = self.peaks[0].mz.value;
        let mut kept = Vec::with_capacity(self.peaks.len().min(top));
        for (_, window) in &self
            .peaks
            .iter()
            .group_by(|p| ((p.mz.value - start) / window_size).floor() as i64)
        {
            kept.extend(
                window
                    .copied()
                    .k_largest_by_key(top, |p| p.intensity)
                    .sorted(),
            );
        }
        self.peaks = kept;
    }
}

impl Extend<CentroidPeak> for Spectrum {
    fn extend<T: IntoIterator<Item = CentroidPeak>>(&mut self, iter: T) {
        self.peaks.extend(iter);
        self.peaks.sort_unstable();
    }
}

impl IntoIterator for Spectrum {
    type Item = CentroidPeak;
    type IntoIter = std::vec::IntoIter<CentroidPeak>;
    fn into_iter(self) -> Self::IntoIter {
        self.peaks.into_iter()
    }
}

impl std::ops::Index<usize> for Spectrum {
    type Output = CentroidPeak;
    fn index(&self, index: usize) -> &Self::Output {
        &self.peaks[index]
    }
}

/// An acquisition run: an ordered sequence of spectra with non decreasing
/// retention times. Owns all spectra and their peaks for the duration of the
/// run; the pipeline takes copies of whatever it keeps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Experiment {
    spectra: Vec<Spectrum>,
}

impl Experiment {
    /// Create an empty experiment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spectrum at the end of the run
    pub fn push(&mut self, spectrum: Spectrum) {
        self.spectra.push(spectrum);
    }

    /// The number of spectra
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// Whether the experiment holds no spectra
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// All spectra in acquisition order
    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    /// The indices of all MS1 spectra, in acquisition order
    pub fn ms1_indices(&self) -> Vec<usize> {
        self.spectra
            .iter()
            .positions(|s| s.ms_level == 1)
            .collect()
    }
}

impl std::ops::Index<usize> for Experiment {
    type Output = Spectrum;
    fn index(&self, index: usize) -> &Self::Output {
        &self.spectra[index]
    }
}

impl FromIterator<Spectrum> for Experiment {
    fn from_iter<T: IntoIterator<Item = Spectrum>>(iter: T) -> Self {
        Self {
            spectra: iter.into_iter().collect(),
        }
    }
}

/// A single point of a chromatogram
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ChromatogramPoint {
    /// The retention time of this point
    pub rt: Time,
    /// The measured intensity at this time
    pub intensity: OrderedFloat<f64>,
}

/// A targeted (SRM/MRM) chromatogram: intensity over retention time for one
/// precursor to product transition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Chromatogram {
    /// The monitored precursor m/z, if known
    pub precursor_mz: Option<MassOverCharge>,
    /// The monitored product m/z, if known
    pub product_mz: Option<MassOverCharge>,
    /// The data points, with strictly increasing retention times
    points: Vec<ChromatogramPoint>,
}

impl Chromatogram {
    /// Create a chromatogram from (retention time, intensity) pairs
    pub fn from_points(points: impl IntoIterator<Item = (Time, f64)>) -> Self {
        Self {
            precursor_mz: None,
            product_mz: None,
            points: points
                .into_iter()
                .map(|(rt, intensity)| ChromatogramPoint {
                    rt,
                    intensity: intensity.into(),
                })
                .collect(),
        }
    }

    /// The number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the chromatogram holds no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All points in time order
    pub fn points(&self) -> &[ChromatogramPoint] {
        &self.points
    }

    /// The retention times as a plain vector
    pub fn rts(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.rt.value).collect()
    }

    /// The intensities as a plain vector
    pub fn intensities(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.intensity.into_inner()).collect()
    }
}
