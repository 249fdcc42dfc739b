//! # fmri-denoise: nuisance regression and temporal detrending for fMRI
//!
//! `fmri-denoise` removes known nuisance signal from 4-D functional images.
//! It works on NIfTI images and tab-separated confound tables and covers
//! three steps:
//!
//! * **Temporal detrending.** A Savitzky–Golay smoother estimates the slow
//!   trend of every voxel (or confound column), which is subtracted while
//!   keeping the series mean.
//! * **Per-slice nuisance regression.** For every slice an intercept,
//!   per-slice regressors and broadcast per-timepoint regressors are fitted
//!   by SVD least squares, optionally after PCA / ICA reduction. Residuals,
//!   R² and betas are written as images.
//! * **Confound assembly.** Motion parameters are extended with derivatives
//!   and their squares, aCompCor components are extracted from white-matter
//!   and CSF masks, and everything is concatenated with framewise
//!   displacement and DVARS into one aligned table.
//!
//! ## Pipeline overview
//!
//! ```text
//! bold.nii.gz ─┬─ detrend (SG, window in s)            → bold_sg.nii.gz
//!              │
//! motion.par ──┼─ extend (detrend, d/dt, (d/dt)²)      → new_moco_pars.tsv
//!              │                                         ext_moco_pars.tsv
//! wm/csf maps ─┼─ threshold → erode → ∪ → components   → bold_acompcor.tsv
//!              │
//! fd, dvars ───┴─ concatenate (fixed order)            → all_confounds.tsv
//!                   └─ detrend (SG)                    → all_confounds_sg.tsv
//!                        │
//!                        └─ per-slice OLS (rayon)      → bold_sg_res / _rsq / _betas
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use fmri_denoise::{denoise_run, PipelineConfig, RunInputs};
//! use std::path::Path;
//!
//! let inputs = RunInputs {
//!     image: "sub-01_bold.nii.gz".into(),
//!     motion: "sub-01_bold.par".into(),
//!     fd: Some("sub-01_fd.txt".into()),
//!     dvars: Some("sub-01_dvars.txt".into()),
//!     compartment_maps: vec!["wm_prob.nii.gz".into(), "csf_prob.nii.gz".into()],
//!     ..RunInputs::default()
//! };
//! let out = denoise_run(&inputs, Path::new("out"), &PipelineConfig::default()).unwrap();
//! println!("residuals in {}", out.nuisance.residuals.display());
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use fmri_denoise::{fit_nuisances, savgol_filter_image, NuisanceConfig, SgConfig};
//! use std::path::Path;
//!
//! let out = Path::new("out");
//! let sg = savgol_filter_image(Path::new("bold.nii.gz"), out, &SgConfig::default(), Some(2.0)).unwrap();
//! let res = fit_nuisances(&sg, &[], Some(Path::new("confounds.txt")), out, &NuisanceConfig::default()).unwrap();
//! ```
//!
//! Errors are `anyhow::Error`; the fatal kinds can be recovered with
//! `err.downcast_ref::<DenoiseError>()`. Progress is reported through
//! `tracing`; install a subscriber to see it.

pub mod config;
pub mod confounds;
pub mod detrend;
pub mod error;
pub mod filter;
pub mod nifti_io;
pub mod regress;
pub mod table;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use tracing::info;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config
pub use config::{ConfoundConfig, NuisanceConfig, PipelineConfig, SgConfig};

// error
pub use error::DenoiseError;

// detrend
pub use detrend::{
    detrend_rows, detrend_series, detrend_table, remove_trend_rows, savgol_filter_confounds,
    savgol_filter_image, SgSmoother,
};

// regression
pub use regress::{
    fit_nuisances, fit_ols, regress_volume, IcaParams, NuisanceOutputs, Reduction,
    RegressionResult,
};

// confounds
pub use confounds::{
    compcor_file, concat_confound_files, concat_confounds, extend_motion_file,
    extend_motion_parameters, ConfoundFiles, ConfoundSources, MotionOutputs, MotionTables,
};

// io
pub use nifti_io::{read_volume, write_image, VolumeSeries};
pub use table::ConfoundTable;

/// Input files for one functional run.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// 4-D functional image.
    pub image: PathBuf,
    /// Six-column motion parameter text file (`[T, 6]`, no header).
    pub motion: PathBuf,
    /// Framewise displacement, one value per timepoint.
    pub fd: Option<PathBuf>,
    /// DVARS, one value per timepoint.
    pub dvars: Option<PathBuf>,
    /// Tissue probability maps (white matter, CSF) for aCompCor. Empty skips
    /// the compartment regressors.
    pub compartment_maps: Vec<PathBuf>,
    /// Per-slice regressor images, each squeezable to `[Z, T]`.
    pub slice_regressors: Vec<PathBuf>,
    /// Repetition time in seconds. `None` reads it from the image header.
    pub tr: Option<f64>,
}

/// Files written by [`denoise_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutputs {
    pub filtered_image: Option<PathBuf>,
    pub motion: MotionOutputs,
    pub compcor: Option<PathBuf>,
    pub confounds: PathBuf,
    pub filtered_confounds: Option<PathBuf>,
    pub nuisance: NuisanceOutputs,
}

/// Run the **full denoising chain** for one functional run.
///
/// # Steps
///
/// 1. Detrend the image with [`PipelineConfig::sg`] when
///    [`PipelineConfig::filter_image`] is set.
/// 2. Extend the motion parameters ([`ConfoundConfig::derivative_orders`]).
/// 3. Extract aCompCor components from the working image when probability
///    maps are given.
/// 4. Concatenate motion, FD, aCompCor and DVARS in that order.
/// 5. Detrend the confound table when [`PipelineConfig::filter_confounds`]
///    is set.
/// 6. Regress the confound columns (broadcast to every slice) and the
///    per-slice regressors out of the working image.
///
/// Every output is computed in memory first and only then written, so a
/// failure in any step leaves `out_dir` untouched.
///
/// # Errors
///
/// * [`DenoiseError::InvalidWindow`] when the SG window does not fit the run.
/// * [`DenoiseError::ShapeMismatch`] for masks, per-slice regressors or
///   motion files of the wrong shape.
/// * [`DenoiseError::ConfoundAlignment`] when confound sources disagree on
///   the number of timepoints.
/// * I/O and NIfTI errors, with the offending path as context.
pub fn denoise_run(inputs: &RunInputs, out_dir: &Path, cfg: &PipelineConfig) -> Result<RunOutputs> {
    let start = Instant::now();
    info!(image = %inputs.image.display(), "denoising run started");

    let raw = read_volume(&inputs.image)?;
    let (_, _, nz, n_t) = raw.dims();
    let tr = inputs.tr.unwrap_or_else(|| raw.header_tr());

    // 1. image
    let (series, filtered_image) = if cfg.filter_image {
        let filtered = detrend_series(&raw, &cfg.sg, Some(tr))?;
        (filtered, Some(nifti_io::derived_path(&inputs.image, out_dir, "_sg")))
    } else {
        (raw, None)
    };
    let base_image = filtered_image.clone().unwrap_or_else(|| inputs.image.clone());

    // 2. motion
    let pars = confounds::read_motion_parameters(&inputs.motion)?;
    let motion = extend_motion_parameters(&pars, tr, &cfg.confounds)?;

    // 3. aCompCor
    let compcor = if inputs.compartment_maps.is_empty() {
        None
    } else {
        Some(confounds::compcor_from_series(
            &series,
            &inputs.compartment_maps,
            &cfg.confounds,
        )?)
    };

    // 4. concatenation
    let fd = inputs
        .fd
        .as_deref()
        .map(|p| table::read_scalar_series(p, confounds::assemble::FD_COLUMN))
        .transpose()?;
    let dvars = inputs
        .dvars
        .as_deref()
        .map(|p| table::read_scalar_series(p, confounds::assemble::DVARS_COLUMN))
        .transpose()?;
    let all = concat_confounds(&ConfoundSources {
        motion: &motion.extended,
        fd: fd.as_ref(),
        compcor: compcor.as_ref(),
        dvars: dvars.as_ref(),
    })?;
    if all.n_rows() != n_t {
        return Err(DenoiseError::ConfoundAlignment {
            name: "confounds".into(),
            rows: all.n_rows(),
            expected: n_t,
        }
        .into());
    }

    // 5. confound detrending
    let filtered_all = if cfg.filter_confounds {
        Some(detrend_table(&all, &cfg.sg, tr)?)
    } else {
        None
    };

    // 6. regression
    let per_slice = inputs
        .slice_regressors
        .iter()
        .map(|p| nifti_io::read_slice_regressor(p, nz, n_t))
        .collect::<Result<Vec<_>>>()?;
    let regressors = filtered_all.as_ref().unwrap_or(&all).data.t().to_owned();
    let result = regress_volume(&series.data, &per_slice, Some(&regressors), &cfg.nuisance)?;

    // ── write ─────────────────────────────────────────────────────────────
    let outputs = RunOutputs {
        filtered_image,
        motion: MotionOutputs {
            base: out_dir.join(confounds::motion::BASE_MOTION_FILE),
            extended: out_dir.join(confounds::motion::EXTENDED_MOTION_FILE),
        },
        compcor: compcor
            .as_ref()
            .map(|_| out_dir.join(format!("{}_acompcor.tsv", nifti_io::image_stem(&inputs.image)))),
        confounds: out_dir.join(confounds::ALL_CONFOUNDS_FILE),
        filtered_confounds: filtered_all.as_ref().map(|_| {
            let stem = confounds::ALL_CONFOUNDS_FILE.trim_end_matches(".tsv");
            out_dir.join(format!("{stem}_sg.tsv"))
        }),
        nuisance: regress::engine::nuisance_paths(&base_image, out_dir),
    };

    let write_series = |p: &Path| write_image(p, &series.data, &series.header);
    let write_base = |p: &Path| motion.base.write_tsv(p);
    let write_ext = |p: &Path| motion.extended.write_tsv(p);
    let write_compcor = |p: &Path| match &compcor {
        Some(t) => t.write_tsv(p),
        None => Ok(()),
    };
    let write_all = |p: &Path| all.write_tsv(p);
    let write_filtered_all = |p: &Path| match &filtered_all {
        Some(t) => t.write_tsv(p),
        None => Ok(()),
    };
    let write_res = |p: &Path| write_image(p, &result.residuals, &series.header);
    let write_rsq = |p: &Path| write_image(p, &result.rsq, &series.header);
    let write_betas = |p: &Path| write_image(p, &result.betas, &series.header);

    let mut jobs: Vec<(&Path, nifti_io::Writer<'_>)> = Vec::new();
    if let Some(p) = &outputs.filtered_image {
        jobs.push((p.as_path(), &write_series));
    }
    jobs.push((outputs.motion.base.as_path(), &write_base));
    jobs.push((outputs.motion.extended.as_path(), &write_ext));
    if let Some(p) = &outputs.compcor {
        jobs.push((p.as_path(), &write_compcor));
    }
    jobs.push((outputs.confounds.as_path(), &write_all));
    if let Some(p) = &outputs.filtered_confounds {
        jobs.push((p.as_path(), &write_filtered_all));
    }
    jobs.push((outputs.nuisance.residuals.as_path(), &write_res));
    jobs.push((outputs.nuisance.rsq.as_path(), &write_rsq));
    jobs.push((outputs.nuisance.betas.as_path(), &write_betas));
    nifti_io::write_all_or_none(&jobs)?;

    info!(
        image = %inputs.image.display(),
        confounds = all.n_cols(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "denoising run finished"
    );
    Ok(outputs)
}
