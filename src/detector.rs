//! The top level feature detection driver.
//!
//! Composes trace detection, elution peak splitting, isotope pattern
//! assembly, and feature emission into the one public pipeline operation.
//! Any error from a stage discards the partial output and propagates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::elution::split_traces;
use crate::error::FeatureFindingError;
use crate::feature::{emit_features, Feature};
use crate::model::{FeatureFindingParams, NoiseThreshold};
use crate::noise::{NoiseMap, DEFAULT_MZ_NOISE_WINDOW};
use crate::pattern::assemble_patterns;
use crate::spectrum::Experiment;
use crate::trace::detect_traces;

/// A cooperative cancellation token, checked between the work units of every
/// pipeline stage. Cloning shares the flag; cancellation is a monotone one
/// way switch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token: every holder sees the pipeline abort at its next check
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Relaxed);
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }

    /// Turn the fired state into the matching error value.
    ///
    /// # Errors
    /// [`FeatureFindingError::Cancelled`] when the token has fired.
    pub fn check(&self) -> Result<(), FeatureFindingError> {
        if self.is_cancelled() {
            Err(FeatureFindingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Detect and quantify the features of an experiment.
///
/// Shorthand for [`detect_features_cancellable`] with a token that never
/// fires.
///
/// # Errors
/// See [`detect_features_cancellable`].
pub fn detect_features(
    experiment: &Experiment,
    params: &FeatureFindingParams,
) -> Result<Vec<Feature>, FeatureFindingError> {
    detect_features_cancellable(experiment, params, &CancelToken::new())
}

/// Detect and quantify the features of an experiment, aborting when the
/// given token fires.
///
/// The MS1 spectra are walked into mass traces, each trace is split into its
/// elution peaks, co-eluting peaks are grouped into charge resolved isotope
/// patterns, and the accepted patterns are emitted as features ordered by
/// decreasing intensity. In deterministic mode (the default) the result is a
/// pure function of the input and the parameters.
///
/// # Errors
/// [`FeatureFindingError::InvalidParameter`] when a parameter is outside its
/// domain, [`FeatureFindingError::MalformedInput`] when the experiment
/// violates an intake invariant, [`FeatureFindingError::EmptyInput`] for an
/// experiment without MS1 spectra under `strict_empty`, and
/// [`FeatureFindingError::Cancelled`] when the token fires.
pub fn detect_features_cancellable(
    experiment: &Experiment,
    params: &FeatureFindingParams,
    cancel: &CancelToken,
) -> Result<Vec<Feature>, FeatureFindingError> {
    params.validate()?;

    if experiment.ms1_indices().is_empty() {
        return if params.strict_empty {
            Err(FeatureFindingError::EmptyInput)
        } else {
            Ok(Vec::new())
        };
    }

    // One noise map serves both the seeding threshold and the elution peak
    // acceptance test
    let noise = match params.noise_threshold {
        NoiseThreshold::Auto { .. } => Some(NoiseMap::from_experiment(
            experiment,
            DEFAULT_MZ_NOISE_WINDOW,
        )?),
        NoiseThreshold::Off | NoiseThreshold::Absolute(_) => None,
    };

    let traces = detect_traces(experiment, params, noise.as_ref(), cancel)?;
    let peaks = split_traces(traces, params, noise.as_ref(), cancel)?;
    let patterns = assemble_patterns(peaks, params, cancel)?;
    Ok(emit_features(patterns))
}
