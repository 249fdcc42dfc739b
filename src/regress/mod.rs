//! Per-slice nuisance regression.
//!
//! ```text
//! regressors (intercept | per-slice | per-timepoint)
//!   → optional PCA / ICA reduction to k components
//!   → OLS per voxel
//!   → residuals, R², betas
//! ```
pub mod design;
pub mod engine;
pub mod ols;
pub mod reduce;

pub use design::{assemble_slice_regressors, n_regressors};
pub use engine::{fit_nuisances, regress_volume, NuisanceOutputs, RegressionResult};
pub use ols::{fit_ols, SliceFit};
pub use reduce::{IcaParams, Reduction};
