//! The error values returned by the feature finding pipeline.
//!
//! Every failure mode is a value of the closed [`FeatureFindingError`] enum.
//! The pipeline never panics on malformed data and never uses errors for
//! control flow; recoverable numerical trouble inside a stage is handled
//! locally (the offending unit is skipped with a logged warning) and all
//! other kinds abort the run.

use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;

/// An error produced by the feature finding pipeline or the chromatogram picker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureFindingError {
    /// A parameter value outside its documented domain. Carries the parameter
    /// name and the reason it was rejected.
    InvalidParameter {
        /// The name of the offending parameter
        parameter: &'static str,
        /// Why the value was rejected
        reason: String,
    },
    /// The input violates an intake invariant (non monotonic retention times,
    /// unsorted peaks). Carries the index of the spectrum where the violation
    /// was detected, when there is one.
    MalformedInput {
        /// The index of the offending spectrum, if the violation is tied to one
        spectrum_index: Option<usize>,
        /// What was wrong
        reason: String,
    },
    /// The experiment contains no MS1 spectra. Only returned when strict empty
    /// handling is requested; the default is an empty result list.
    EmptyInput,
    /// A numerical routine produced a non finite value. Inside the pipeline
    /// this is recovered from locally; it only crosses the public boundary
    /// when a caller invokes a numerical building block directly.
    NumericalFailure {
        /// The stage or routine that failed
        stage: &'static str,
        /// What went non finite
        reason: String,
    },
    /// The cancellation token fired. No partial output is returned.
    Cancelled,
}

impl FeatureFindingError {
    /// Shorthand for an [`FeatureFindingError::InvalidParameter`] value
    pub fn invalid_parameter(parameter: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an [`FeatureFindingError::MalformedInput`] value
    pub fn malformed(spectrum_index: Option<usize>, reason: impl fmt::Display) -> Self {
        Self::MalformedInput {
            spectrum_index,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an [`FeatureFindingError::NumericalFailure`] value
    pub fn numerical(stage: &'static str, reason: impl fmt::Display) -> Self {
        Self::NumericalFailure {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FeatureFindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter { parameter, reason } => {
                write!(f, "invalid parameter `{parameter}`: {reason}")
            }
            Self::MalformedInput {
                spectrum_index: Some(index),
                reason,
            } => write!(f, "malformed input at spectrum {index}: {reason}"),
            Self::MalformedInput {
                spectrum_index: None,
                reason,
            } => write!(f, "malformed input: {reason}"),
            Self::EmptyInput => write!(f, "the experiment contains no MS1 spectra"),
            Self::NumericalFailure { stage, reason } => {
                write!(f, "numerical failure in {stage}: {reason}")
            }
            Self::Cancelled => write!(f, "the run was cancelled"),
        }
    }
}

impl error::Error for FeatureFindingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_structure() {
        let error = FeatureFindingError::invalid_parameter("chrom_fwhm", "must be positive");
        assert_eq!(
            error.to_string(),
            "invalid parameter `chrom_fwhm`: must be positive"
        );

        let error = FeatureFindingError::malformed(Some(7), "retention time went backwards");
        assert_eq!(
            error.to_string(),
            "malformed input at spectrum 7: retention time went backwards"
        );
    }

    #[test]
    fn round_trips_through_serde() {
        let error = FeatureFindingError::Cancelled;
        let json: &'static str = Box::leak(serde_json::to_string(&error).unwrap().into_boxed_str());
        assert_eq!(serde_json::from_str::<FeatureFindingError>(json).unwrap(), error);
    }
}
