//! The parameter models steering the pipeline and the chromatogram picker.

use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;
use crate::isotopes::AveragineTable;
use crate::system::{seconds, MassOverCharge, Time};
use crate::tolerance::Tolerance;

/// When trace extension gives up on a direction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceTermination {
    /// Stop after this many consecutive spectra without a match
    Outlier {
        /// The outlier budget
        max_consecutive: usize,
    },
    /// Stop when the ratio of matched to traversed spectra drops below the
    /// minimum sample rate
    SampleRate,
}

/// The intensity floor below which centroids never seed a trace
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NoiseThreshold {
    /// Every centroid may seed
    Off,
    /// A fixed intensity floor
    Absolute(f64),
    /// Derive the floor per spectrum from the median noise estimator, as this
    /// multiple of the local noise
    Auto {
        /// The required signal to noise multiple
        sn: f64,
    },
}

/// Which elution peaks survive on their estimated width
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WidthFiltering {
    /// Keep everything
    Off,
    /// Keep peaks with a full width at half maximum inside a fixed range
    Fixed {
        /// The narrowest accepted peak
        min: Time,
        /// The widest accepted peak
        max: Time,
    },
    /// Keep peaks inside the 5% to 95% quantiles of all widths in the run
    Auto,
}

/// The inclusive charge range considered during isotope pattern assembly
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRange {
    /// The lowest considered charge, at least 1
    pub min: usize,
    /// The highest considered charge
    pub max: usize,
}

/// The parameters of the feature finding pipeline.
///
/// All values have sensible label free quantification defaults; the builder
/// style setters allow overriding individual values.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureFindingParams {
    /// Mass tolerance for trace extension and isotope matching
    pub tolerance: Tolerance<MassOverCharge>,
    /// Minimum number of centroids in a trace
    pub min_trace_length: usize,
    /// Minimum ratio of matched to expected scans over a trace's span, in (0, 1]
    pub min_sample_rate: f64,
    /// When trace extension gives up
    pub termination: TraceTermination,
    /// The seeding intensity floor
    pub noise_threshold: NoiseThreshold,
    /// Keep at most this many traces (the most intense ones)
    pub max_traces: Option<usize>,
    /// Expected chromatographic peak width, steering the elution smoothing
    pub chrom_fwhm: Time,
    /// Signal to noise multiple an elution maximum must clear
    pub chrom_peak_snr: f64,
    /// Which elution peaks survive on their width
    pub width_filtering: WidthFiltering,
    /// When false, every trace is taken as a single elution peak
    pub enable_elution_splitting: bool,
    /// Charges considered during isotope pattern assembly
    pub charge_range: ChargeRange,
    /// Maximum apex retention time difference for co-elution
    pub rt_tolerance: Time,
    /// Required boundary overlap fraction for co-elution, in [0, 1]
    pub coelution_overlap: f64,
    /// Minimum isotope envelope fit score, in [0, 1]
    pub iso_min_score: f64,
    /// Emit peaks without isotope siblings as single trace charge one features
    pub allow_singletons: bool,
    /// The averagine composition used for envelope prediction
    pub averagine: AveragineTable,
    /// Force sequential processing so results are byte for byte reproducible
    pub deterministic_order: bool,
    /// Treat an experiment without MS1 spectra as an error instead of an
    /// empty result
    pub strict_empty: bool,
}

impl Default for FeatureFindingParams {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::new_ppm(20.0),
            min_trace_length: 5,
            min_sample_rate: 0.5,
            termination: TraceTermination::Outlier { max_consecutive: 5 },
            noise_threshold: NoiseThreshold::Off,
            max_traces: None,
            chrom_fwhm: seconds(5.0),
            chrom_peak_snr: 3.0,
            width_filtering: WidthFiltering::Auto,
            enable_elution_splitting: true,
            charge_range: ChargeRange { min: 1, max: 5 },
            rt_tolerance: seconds(5.0),
            coelution_overlap: 0.5,
            iso_min_score: 0.75,
            allow_singletons: false,
            averagine: AveragineTable::PEPTIDE,
            deterministic_order: true,
            strict_empty: false,
        }
    }
}

/// Builder style methods
impl FeatureFindingParams {
    /// Set the mass tolerance
    #[must_use]
    pub fn tolerance(self, tolerance: Tolerance<MassOverCharge>) -> Self {
        Self { tolerance, ..self }
    }

    /// Set the minimum trace length
    #[must_use]
    pub fn min_trace_length(self, min_trace_length: usize) -> Self {
        Self {
            min_trace_length,
            ..self
        }
    }

    /// Set the minimum sample rate
    #[must_use]
    pub fn min_sample_rate(self, min_sample_rate: f64) -> Self {
        Self {
            min_sample_rate,
            ..self
        }
    }

    /// Set the trace termination criterion
    #[must_use]
    pub fn termination(self, termination: TraceTermination) -> Self {
        Self { termination, ..self }
    }

    /// Set the seeding intensity floor
    #[must_use]
    pub fn noise_threshold(self, noise_threshold: NoiseThreshold) -> Self {
        Self {
            noise_threshold,
            ..self
        }
    }

    /// Limit the number of kept traces
    #[must_use]
    pub fn max_traces(self, max_traces: Option<usize>) -> Self {
        Self { max_traces, ..self }
    }

    /// Set the expected chromatographic peak width
    #[must_use]
    pub fn chrom_fwhm(self, chrom_fwhm: Time) -> Self {
        Self { chrom_fwhm, ..self }
    }

    /// Set the elution peak signal to noise threshold
    #[must_use]
    pub fn chrom_peak_snr(self, chrom_peak_snr: f64) -> Self {
        Self {
            chrom_peak_snr,
            ..self
        }
    }

    /// Set the width filtering mode
    #[must_use]
    pub fn width_filtering(self, width_filtering: WidthFiltering) -> Self {
        Self {
            width_filtering,
            ..self
        }
    }

    /// Enable or bypass elution peak splitting
    #[must_use]
    pub fn enable_elution_splitting(self, enable_elution_splitting: bool) -> Self {
        Self {
            enable_elution_splitting,
            ..self
        }
    }

    /// Set the considered charge range
    #[must_use]
    pub fn charge_range(self, min: usize, max: usize) -> Self {
        Self {
            charge_range: ChargeRange { min, max },
            ..self
        }
    }

    /// Set the co-elution retention time tolerance
    #[must_use]
    pub fn rt_tolerance(self, rt_tolerance: Time) -> Self {
        Self { rt_tolerance, ..self }
    }

    /// Set the required co-elution overlap fraction
    #[must_use]
    pub fn coelution_overlap(self, coelution_overlap: f64) -> Self {
        Self {
            coelution_overlap,
            ..self
        }
    }

    /// Set the minimum envelope fit score
    #[must_use]
    pub fn iso_min_score(self, iso_min_score: f64) -> Self {
        Self {
            iso_min_score,
            ..self
        }
    }

    /// Allow or forbid singleton features
    #[must_use]
    pub fn allow_singletons(self, allow_singletons: bool) -> Self {
        Self {
            allow_singletons,
            ..self
        }
    }

    /// Set the averagine composition
    #[must_use]
    pub fn averagine(self, averagine: AveragineTable) -> Self {
        Self { averagine, ..self }
    }

    /// Force or release deterministic sequential processing
    #[must_use]
    pub fn deterministic_order(self, deterministic_order: bool) -> Self {
        Self {
            deterministic_order,
            ..self
        }
    }

    /// Treat empty input as an error
    #[must_use]
    pub fn strict_empty(self, strict_empty: bool) -> Self {
        Self { strict_empty, ..self }
    }

    /// Check every value against its documented domain.
    ///
    /// # Errors
    /// [`FeatureFindingError::InvalidParameter`] naming the first offending
    /// parameter.
    pub fn validate(&self) -> Result<(), FeatureFindingError> {
        let tolerance_valid = match &self.tolerance {
            Tolerance::ppm(value) => value.into_inner() > 0.0 && value.is_finite(),
            Tolerance::Abs(value) => value.value > 0.0 && value.value.is_finite(),
        };
        if !tolerance_valid {
            return Err(FeatureFindingError::invalid_parameter(
                "mz_tolerance",
                "must be positive and finite",
            ));
        }
        if self.min_trace_length < 2 {
            return Err(FeatureFindingError::invalid_parameter(
                "min_trace_length",
                "must be at least 2",
            ));
        }
        if !(self.min_sample_rate > 0.0 && self.min_sample_rate <= 1.0) {
            return Err(FeatureFindingError::invalid_parameter(
                "min_sample_rate",
                "must lie in (0, 1]",
            ));
        }
        if let TraceTermination::Outlier { max_consecutive } = self.termination {
            if max_consecutive == 0 {
                return Err(FeatureFindingError::invalid_parameter(
                    "trace_termination_outliers",
                    "must be at least 1",
                ));
            }
        }
        if let NoiseThreshold::Auto { sn } = self.noise_threshold {
            if !(sn > 0.0 && sn.is_finite()) {
                return Err(FeatureFindingError::invalid_parameter(
                    "noise_threshold",
                    "the signal to noise multiple must be positive and finite",
                ));
            }
        }
        if !(self.chrom_fwhm.value > 0.0 && self.chrom_fwhm.value.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "chrom_fwhm",
                "must be positive and finite",
            ));
        }
        if !(self.chrom_peak_snr >= 0.0 && self.chrom_peak_snr.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "chrom_peak_snr",
                "must be non negative and finite",
            ));
        }
        if let WidthFiltering::Fixed { min, max } = self.width_filtering {
            if !(min.value >= 0.0 && max.value >= min.value) {
                return Err(FeatureFindingError::invalid_parameter(
                    "width_filtering",
                    "the fixed range must be non negative and ordered",
                ));
            }
        }
        if self.charge_range.min < 1 || self.charge_range.max < self.charge_range.min {
            return Err(FeatureFindingError::invalid_parameter(
                "charge_range",
                "must satisfy 1 <= min <= max",
            ));
        }
        if !(self.rt_tolerance.value > 0.0 && self.rt_tolerance.value.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "rt_tolerance",
                "must be positive and finite",
            ));
        }
        if !(0.0..=1.0).contains(&self.coelution_overlap) {
            return Err(FeatureFindingError::invalid_parameter(
                "coelution_overlap",
                "must lie in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.iso_min_score) {
            return Err(FeatureFindingError::invalid_parameter(
                "iso_min_score",
                "must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// The apex refinement method of the chromatogram picker
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickerMethod {
    /// Quadratic fit through the three samples around each maximum
    Legacy,
    /// Cubic spline interpolation with zero derivative apex placement
    Corrected,
}

/// The smoothing applied before chromatogram peak picking
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MrmSmoothing {
    /// Gaussian kernel smoothing
    Gaussian {
        /// Full width at half maximum of the kernel
        fwhm: Time,
    },
    /// Savitzky-Golay polynomial smoothing
    SavitzkyGolay {
        /// Window length in samples, odd and at least 3
        window: usize,
        /// Polynomial order
        order: usize,
    },
}

/// The parameters of the SRM/MRM chromatogram peak picker.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MrmPickerParams {
    /// The apex refinement method
    pub method: PickerMethod,
    /// The smoothing applied before maxima detection
    pub smoothing: MrmSmoothing,
    /// Fixed peak width for legacy boundaries; non positive means boundaries
    /// are found by walking to the surrounding minima
    pub peak_width: f64,
    /// Signal to noise multiple a peak apex must clear
    pub signal_to_noise: f64,
    /// Window length of the noise estimator on the retention time axis
    pub noise_window: Time,
}

impl Default for MrmPickerParams {
    fn default() -> Self {
        Self {
            method: PickerMethod::Corrected,
            smoothing: MrmSmoothing::Gaussian { fwhm: seconds(30.0) },
            peak_width: -1.0,
            signal_to_noise: 1.0,
            noise_window: seconds(1000.0),
        }
    }
}

/// Builder style methods
impl MrmPickerParams {
    /// Set the apex refinement method
    #[must_use]
    pub fn method(self, method: PickerMethod) -> Self {
        Self { method, ..self }
    }

    /// Set the smoothing
    #[must_use]
    pub fn smoothing(self, smoothing: MrmSmoothing) -> Self {
        Self { smoothing, ..self }
    }

    /// Set the fixed legacy peak width
    #[must_use]
    pub fn peak_width(self, peak_width: f64) -> Self {
        Self { peak_width, ..self }
    }

    /// Set the signal to noise threshold
    #[must_use]
    pub fn signal_to_noise(self, signal_to_noise: f64) -> Self {
        Self {
            signal_to_noise,
            ..self
        }
    }

    /// Set the noise estimator window
    #[must_use]
    pub fn noise_window(self, noise_window: Time) -> Self {
        Self { noise_window, ..self }
    }

    /// Check every value against its documented domain.
    ///
    /// # Errors
    /// [`FeatureFindingError::InvalidParameter`] naming the first offending
    /// parameter.
    pub fn validate(&self) -> Result<(), FeatureFindingError> {
        match self.smoothing {
            MrmSmoothing::Gaussian { fwhm } => {
                if !(fwhm.value > 0.0 && fwhm.value.is_finite()) {
                    return Err(FeatureFindingError::invalid_parameter(
                        "smoothing",
                        "the Gaussian width must be positive and finite",
                    ));
                }
            }
            MrmSmoothing::SavitzkyGolay { window, order } => {
                if window < 3 || window % 2 == 0 || order == 0 || order >= window {
                    return Err(FeatureFindingError::invalid_parameter(
                        "smoothing",
                        "the window must be odd and at least 3, the order in [1, window)",
                    ));
                }
            }
        }
        if !(self.signal_to_noise >= 0.0 && self.signal_to_noise.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "signal_to_noise",
                "must be non negative and finite",
            ));
        }
        if !(self.noise_window.value > 0.0 && self.noise_window.value.is_finite()) {
            return Err(FeatureFindingError::invalid_parameter(
                "noise_window",
                "must be positive and finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FeatureFindingParams::default().validate().is_ok());
        assert!(MrmPickerParams::default().validate().is_ok());
    }

    #[test]
    fn invalid_values_name_the_parameter() {
        let params = FeatureFindingParams::default().min_sample_rate(0.0);
        assert_eq!(
            params.validate(),
            Err(FeatureFindingError::invalid_parameter(
                "min_sample_rate",
                "must lie in (0, 1]"
            ))
        );

        let params = FeatureFindingParams::default().charge_range(3, 2);
        assert!(matches!(
            params.validate(),
            Err(FeatureFindingError::InvalidParameter { parameter: "charge_range", .. })
        ));

        let params = MrmPickerParams::default().signal_to_noise(f64::NAN);
        assert!(params.validate().is_err());
    }

    #[test]
    fn params_round_trip_through_serde() {
        let params = FeatureFindingParams::default()
            .charge_range(1, 3)
            .allow_singletons(true);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<FeatureFindingParams>(&json).unwrap(), params);
    }
}
