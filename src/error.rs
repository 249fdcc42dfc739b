//! Error taxonomy for the denoising core.
//!
//! Public functions return [`anyhow::Result`]; the fatal variants below are
//! wrapped into the `anyhow::Error` so callers can recover the kind with
//! `err.downcast_ref::<DenoiseError>()`.
//!
//! | Variant             | Fatal | Raised by                                   |
//! |---------------------|-------|---------------------------------------------|
//! | `InvalidWindow`     | yes   | Savitzky–Golay window / order validation    |
//! | `ShapeMismatch`     | yes   | image, mask and regressor shape checks      |
//! | `ConfoundAlignment` | yes   | confound concatenation                      |
//! | `NumericDegeneracy` | no    | per-voxel OLS, zero-filled and logged       |
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DenoiseError {
    #[error("invalid filter window: {window} samples (polyorder {polyorder}) for a series of {n_samples} samples")]
    InvalidWindow {
        window: usize,
        polyorder: usize,
        n_samples: usize,
    },

    #[error("shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("confound alignment: '{name}' has {rows} rows, expected {expected}")]
    ConfoundAlignment {
        name: String,
        rows: usize,
        expected: usize,
    },

    #[error("non-finite coefficients for {n_voxels} voxel(s) in slice {slice}")]
    NumericDegeneracy { slice: usize, n_voxels: usize },
}

impl DenoiseError {
    pub fn shape(what: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        DenoiseError::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
