//! Savitzky–Golay filter design and application.
//!
//! - [`design`]: least-squares polynomial kernel, window conversion and the
//!   repetition-time plausibility heuristic.
//! - [`apply`]: overlap-add zero-phase convolution with `nearest` edges,
//!   parallel over rows.

pub mod apply;
pub mod design;

pub use apply::{convolve_rows, filter_1d, OverlapAdd};
pub use design::{
    design_savgol, normalize_sampling_interval, validate_window, window_samples,
    TR_MAX_PLAUSIBLE, TR_MIN_PLAUSIBLE,
};
