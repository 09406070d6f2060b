#![doc = include_str!("../README.md")]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::wildcard_imports,
    clippy::module_name_repetitions,
    clippy::suboptimal_flops,
    clippy::too_many_lines
)]

mod detector;
mod elution;
pub mod error;
mod feature;
pub mod filtering;
mod helper_functions;
pub mod isotopes;
pub mod model;
pub mod noise;
mod mrm;
mod pattern;
mod spectrum;
mod spline;
pub mod system;
mod tolerance;
mod trace;


pub use crate::detector::{detect_features, detect_features_cancellable, CancelToken};
pub use crate::elution::split_traces;
pub use crate::error::FeatureFindingError;
pub use crate::feature::{emit_features, Feature, HullPoint};
pub use crate::model::{
    ChargeRange, FeatureFindingParams, MrmPickerParams, MrmSmoothing, NoiseThreshold,
    PickerMethod, TraceTermination, WidthFiltering,
};
pub use crate::mrm::{pick_all, pick_chromatogram, PickedChromatogram, PickedPeak};
pub use crate::pattern::{assemble_patterns, IsotopePattern};
pub use crate::spectrum::{CentroidPeak, Chromatogram, ChromatogramPoint, Experiment, Spectrum};
pub use crate::spline::CubicSpline;
pub use crate::tolerance::{Tolerance, WithinTolerance};
pub use crate::trace::{detect_traces, MassTrace, TraceEntry};

#[macro_use]
extern crate uom;
