//! Slice-wise nuisance regression of a 4-D run.
//!
//! Each slice along the third spatial axis is fitted independently: its
//! voxels (`[X·Y, T]`) are regressed on that slice's regressor set, which is
//! optionally reduced to `k` components first. Slices share no state, so they
//! run as one rayon task each and their results are written back into
//! disjoint index ranges of the output arrays afterwards.
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{s, Array2, Array3, Array4};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::NuisanceConfig;
use crate::error::DenoiseError;
use crate::nifti_io::{
    derived_path, read_slice_regressor, read_volume, write_all_or_none, write_image, Writer,
};
use crate::regress::design::{assemble_slice_regressors, n_regressors};
use crate::regress::ols::{fit_ols, SliceFit};
use crate::regress::reduce::{IcaParams, Reduction};
use crate::table::read_timepoint_regressors;

/// Residuals, fit quality and coefficients for one run.
#[derive(Debug, Clone)]
pub struct RegressionResult {
    /// `[X, Y, Z, T]`
    pub residuals: Array4<f64>,
    /// `[X, Y, Z]`
    pub rsq: Array3<f64>,
    /// `[X, Y, Z, n_betas]`: one per regressor row, or per component when
    /// the regressors were reduced.
    pub betas: Array4<f64>,
}

/// Paths written by [`fit_nuisances`].
#[derive(Debug, Clone, PartialEq)]
pub struct NuisanceOutputs {
    pub residuals: PathBuf,
    pub rsq: PathBuf,
    pub betas: PathBuf,
}

impl NuisanceConfig {
    pub fn ica_params(&self) -> IcaParams {
        IcaParams {
            seed: self.ica_seed,
            max_iter: self.ica_max_iter,
            tol: self.ica_tol,
        }
    }

    /// Whether the regressor set is reduced before fitting.
    pub fn reduces(&self) -> bool {
        self.num_components > 0 && self.method != Reduction::None
    }
}

/// Regress nuisance signals out of `data` (`[X, Y, Z, T]`) slice by slice.
///
/// * `per_slice`     – regressors with one row per slice, each `[Z, T]`.
/// * `per_timepoint` – `[n, T]` regressors broadcast to every slice.
///
/// Non-finite values in the outputs are replaced with zero.
pub fn regress_volume(
    data: &Array4<f64>,
    per_slice: &[Array2<f64>],
    per_timepoint: Option<&Array2<f64>>,
    cfg: &NuisanceConfig,
) -> Result<RegressionResult> {
    let (nx, ny, nz, n_t) = data.dim();
    for (i, reg) in per_slice.iter().enumerate() {
        if reg.dim() != (nz, n_t) {
            return Err(DenoiseError::shape(
                format!("per-slice regressor {i}"),
                &[nz, n_t],
                reg.shape(),
            )
            .into());
        }
    }
    if let Some(vol) = per_timepoint {
        if vol.ncols() != n_t {
            return Err(DenoiseError::shape(
                "per-timepoint regressors",
                &[vol.nrows(), n_t],
                vol.shape(),
            )
            .into());
        }
    }

    let n_reg = n_regressors(per_slice, per_timepoint);
    let n_betas = if cfg.reduces() {
        cfg.num_components.min(n_reg.min(n_t))
    } else {
        n_reg
    };
    debug!(n_regressors = n_reg, n_betas, slices = nz, "regressor layout");

    let fit_slice = |z: usize| -> Result<SliceFit> {
        let regressors = assemble_slice_regressors(z, per_slice, per_timepoint, n_t);
        let regressors = if cfg.reduces() {
            cfg.method
                .reduce_with(&regressors, cfg.num_components, &cfg.ica_params())?
        } else {
            regressors
        };

        let plane = data.slice(s![.., .., z, ..]);
        let voxels = Array2::from_shape_fn((nx * ny, n_t), |(v, t)| plane[[v / ny, v % ny, t]]);

        let fit = fit_ols(&regressors, &voxels).with_context(|| format!("slice {z}"))?;
        if fit.n_degenerate > 0 {
            let event = DenoiseError::NumericDegeneracy {
                slice: z,
                n_voxels: fit.n_degenerate,
            };
            warn!(slice = z, n_voxels = fit.n_degenerate, "{event}; coefficients zero-filled");
        }
        Ok(fit)
    };

    let fits: Vec<SliceFit> = if cfg.n_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.n_threads)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build thread pool: {}", e))?;
        pool.install(|| (0..nz).into_par_iter().map(fit_slice).collect::<Result<_>>())?
    } else {
        (0..nz).into_par_iter().map(fit_slice).collect::<Result<_>>()?
    };

    let mut residuals = Array4::<f64>::zeros((nx, ny, nz, n_t));
    let mut rsq = Array3::<f64>::zeros((nx, ny, nz));
    let mut betas = Array4::<f64>::zeros((nx, ny, nz, n_betas));
    for (z, fit) in fits.iter().enumerate() {
        for v in 0..nx * ny {
            let (x, y) = (v / ny, v % ny);
            residuals
                .slice_mut(s![x, y, z, ..])
                .assign(&fit.residuals.row(v));
            rsq[[x, y, z]] = fit.rsq[v];
            betas.slice_mut(s![x, y, z, ..]).assign(&fit.betas.row(v));
        }
    }

    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    residuals.mapv_inplace(finite);
    rsq.mapv_inplace(finite);
    betas.mapv_inplace(finite);

    Ok(RegressionResult {
        residuals,
        rsq,
        betas,
    })
}

/// `<stem>_res`, `<stem>_rsq` and `<stem>_betas` next to each other in
/// `out_dir`, keeping the image extension of `in_file`.
pub fn nuisance_paths(in_file: &Path, out_dir: &Path) -> NuisanceOutputs {
    NuisanceOutputs {
        residuals: derived_path(in_file, out_dir, "_res"),
        rsq: derived_path(in_file, out_dir, "_rsq"),
        betas: derived_path(in_file, out_dir, "_betas"),
    }
}

/// Regress nuisances out of an image file and write `<stem>_res`,
/// `<stem>_rsq` and `<stem>_betas` images into `out_dir`.
///
/// * `slice_regressor_files` – images squeezable to `[Z, T]`.
/// * `vol_regressor_file`    – numeric text, `[T, n]` or `[n, T]`.
///
/// Nothing is written unless every input is valid and the fit succeeds; if
/// writing one output fails, outputs already written are removed.
pub fn fit_nuisances(
    in_file: &Path,
    slice_regressor_files: &[PathBuf],
    vol_regressor_file: Option<&Path>,
    out_dir: &Path,
    cfg: &NuisanceConfig,
) -> Result<NuisanceOutputs> {
    let start = Instant::now();
    info!(input = %in_file.display(), "nuisance regression started");

    let series = read_volume(in_file)?;
    let (nz, n_t) = (series.n_slices(), series.n_timepoints());

    let per_slice = slice_regressor_files
        .iter()
        .map(|p| read_slice_regressor(p, nz, n_t))
        .collect::<Result<Vec<_>>>()?;
    let per_timepoint = vol_regressor_file
        .map(|p| read_timepoint_regressors(p, n_t))
        .transpose()?;

    let result = regress_volume(&series.data, &per_slice, per_timepoint.as_ref(), cfg)?;

    let outputs = nuisance_paths(in_file, out_dir);
    let jobs: [(&Path, Writer<'_>); 3] = [
        (
            outputs.residuals.as_path(),
            &|p: &Path| write_image(p, &result.residuals, &series.header),
        ),
        (
            outputs.rsq.as_path(),
            &|p: &Path| write_image(p, &result.rsq, &series.header),
        ),
        (
            outputs.betas.as_path(),
            &|p: &Path| write_image(p, &result.betas, &series.header),
        ),
    ];
    write_all_or_none(&jobs)?;

    info!(
        input = %in_file.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "nuisance regression finished"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_volume(nx: usize, ny: usize, nz: usize, n_t: usize) -> Array4<f64> {
        Array4::from_shape_fn((nx, ny, nz, n_t), |(x, y, z, t)| {
            100.0 + (x + 2 * y + 3 * z) as f64 + 0.1 * t as f64 * (z + 1) as f64
        })
    }

    #[test]
    fn output_shapes_match_input() {
        let data = ramp_volume(3, 4, 2, 15);
        let vol = Array2::from_shape_fn((2, 15), |(r, t)| ((r + 1) * t) as f64);
        let res = regress_volume(&data, &[], Some(&vol), &NuisanceConfig::default()).unwrap();
        assert_eq!(res.residuals.dim(), (3, 4, 2, 15));
        assert_eq!(res.rsq.dim(), (3, 4, 2));
        assert_eq!(res.betas.dim(), (3, 4, 2, 3));
    }

    #[test]
    fn per_slice_regressor_is_used_per_slice() {
        // Each slice carries a different ramp slope; the per-slice regressor
        // holds exactly that ramp, so the fit is perfect in every slice.
        let (nx, ny, nz, n_t) = (2, 2, 3, 12);
        let data = ramp_volume(nx, ny, nz, n_t);
        let ps = Array2::from_shape_fn((nz, n_t), |(z, t)| 0.1 * t as f64 * (z + 1) as f64);
        let res = regress_volume(&data, &[ps], None, &NuisanceConfig::default()).unwrap();
        assert!(res.residuals.iter().all(|r| r.abs() < 1e-8));
        for z in 0..nz {
            approx::assert_abs_diff_eq!(res.betas[[0, 0, z, 1]], 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn slice_regressor_shape_mismatch() {
        let data = ramp_volume(2, 2, 3, 10);
        let ps = Array2::zeros((2, 10));
        let err = regress_volume(&data, &[ps], None, &NuisanceConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DenoiseError>(),
            Some(DenoiseError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reduced_fit_has_component_betas() {
        let data = ramp_volume(2, 3, 2, 20);
        let vol = Array2::from_shape_fn((4, 20), |(r, t)| ((t * (r + 3)) % 7) as f64);
        let cfg = NuisanceConfig {
            num_components: 2,
            method: Reduction::Pca,
            ..NuisanceConfig::default()
        };
        let res = regress_volume(&data, &[], Some(&vol), &cfg).unwrap();
        assert_eq!(res.betas.dim(), (2, 3, 2, 2));
    }

    #[test]
    fn dedicated_pool_matches_global_pool() {
        let data = ramp_volume(3, 3, 4, 16);
        let vol = Array2::from_shape_fn((1, 16), |(_, t)| (t as f64 * 0.7).cos());
        let a = regress_volume(&data, &[], Some(&vol), &NuisanceConfig::default()).unwrap();
        let cfg = NuisanceConfig {
            n_threads: 2,
            ..NuisanceConfig::default()
        };
        let b = regress_volume(&data, &[], Some(&vol), &cfg).unwrap();
        assert_eq!(a.residuals, b.residuals);
        assert_eq!(a.betas, b.betas);
    }

    #[test]
    fn zero_voxels_give_zero_rsq() {
        let data = Array4::<f64>::zeros((2, 2, 1, 10));
        let res = regress_volume(&data, &[], None, &NuisanceConfig::default()).unwrap();
        assert!(res.rsq.iter().all(|&v| v == 0.0));
        assert!(res.residuals.iter().all(|&v| v == 0.0));
    }
}
