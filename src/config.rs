//! Run configuration.
//!
//! Every stage takes its settings as an explicit, immutable struct that is
//! built fresh per call (`Default` gives the pipeline settings) and passed by
//! shared reference. Nothing is mutated behind the caller's back.
//!
//! [`PipelineConfig`] bundles the per-stage structs for [`crate::denoise_run`]
//! and can be loaded from a JSON file; missing keys fall back to defaults.
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::regress::Reduction;

/// Savitzky–Golay detrending settings.
///
/// ```
/// use fmri_denoise::SgConfig;
///
/// let cfg = SgConfig {
///     window_length: 90.0,   // shorter trend window
///     ..SgConfig::default()
/// };
/// assert_eq!(cfg.polyorder, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SgConfig {
    /// Smoothing window in **seconds**. Converted to an odd number of samples
    /// with the repetition time.
    ///
    /// Default: `120.0` s.
    pub window_length: f64,

    /// Order of the local polynomial. Must be smaller than the window in
    /// samples.
    ///
    /// Default: `3`.
    pub polyorder: usize,

    /// Derivative order of the smoothed estimate. `0` smooths.
    ///
    /// Default: `0`.
    pub deriv: usize,
}

impl Default for SgConfig {
    fn default() -> Self {
        Self {
            window_length: 120.0,
            polyorder: 3,
            deriv: 0,
        }
    }
}

/// Settings for the per-slice nuisance regression engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NuisanceConfig {
    /// Number of components to reduce the assembled regressors to.
    /// `0` fits the regressors as they are.
    ///
    /// Default: `0`.
    pub num_components: usize,

    /// Component extraction used when `num_components > 0`.
    ///
    /// Default: [`Reduction::None`].
    pub method: Reduction,

    /// Worker threads for the slice loop. `0` uses the global rayon pool.
    ///
    /// Default: `0`.
    pub n_threads: usize,

    /// Seed for the FastICA unmixing initialisation.
    ///
    /// Default: `0`.
    pub ica_seed: u64,

    /// FastICA iteration cap.
    ///
    /// Default: `200`.
    pub ica_max_iter: usize,

    /// FastICA convergence tolerance on `max |1 - |diag(W_new · W_oldᵀ)||`.
    ///
    /// Default: `1e-4`.
    pub ica_tol: f64,
}

impl Default for NuisanceConfig {
    fn default() -> Self {
        Self {
            num_components: 0,
            method: Reduction::None,
            n_threads: 0,
            ica_seed: 0,
            ica_max_iter: 200,
            ica_tol: 1e-4,
        }
    }
}

/// Settings for confound assembly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfoundConfig {
    /// Number of temporal-derivative orders appended to the motion
    /// parameters (each with a squared copy).
    ///
    /// Default: `2` → 6 × 5 = 30 motion columns.
    pub derivative_orders: usize,

    /// Savitzky–Golay trend removal applied to the raw motion parameters
    /// before derivatives are taken. `None` keeps them as read.
    ///
    /// Default: `Some(SgConfig::default())`.
    pub detrend: Option<SgConfig>,

    /// Probability above which a tissue-probability voxel enters the mask.
    ///
    /// Default: `0.95`.
    pub mask_threshold: f64,

    /// Mask erosion in millimetres, converted to iterations with the smallest
    /// voxel dimension.
    ///
    /// Default: `0.0` (no erosion).
    pub erosion_mm: f64,

    /// Number of anatomical-compartment components.
    ///
    /// Default: `5`.
    pub n_compcor: usize,

    /// Component extraction for the compartment signal.
    ///
    /// Default: [`Reduction::Pca`].
    pub compcor_method: Reduction,
}

impl Default for ConfoundConfig {
    fn default() -> Self {
        Self {
            derivative_orders: 2,
            detrend: Some(SgConfig::default()),
            mask_threshold: 0.95,
            erosion_mm: 0.0,
            n_compcor: 5,
            compcor_method: Reduction::Pca,
        }
    }
}

/// Configuration for the full per-run chain in [`crate::denoise_run`].
///
/// ```
/// use fmri_denoise::PipelineConfig;
///
/// let cfg = PipelineConfig {
///     filter_confounds: false,
///     ..PipelineConfig::default()
/// };
/// assert!(cfg.filter_image);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detrend the functional image before regression.
    ///
    /// Default: `true`.
    pub filter_image: bool,

    /// Detrend the assembled confound table before regression.
    ///
    /// Default: `true`.
    pub filter_confounds: bool,

    pub sg: SgConfig,
    pub nuisance: NuisanceConfig,
    pub confounds: ConfoundConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_image: true,
            filter_confounds: true,
            sg: SgConfig::default(),
            nuisance: NuisanceConfig::default(),
            confounds: ConfoundConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON configuration. Absent keys keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("failed to parse pipeline configuration")
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}
