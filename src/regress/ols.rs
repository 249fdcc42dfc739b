//! Ordinary least squares of many voxel time series on one regressor set.
//!
//! The design `X = regressorsᵀ` (`[T, p]`) is decomposed once with a thin SVD
//! and every voxel is solved against it (minimum-norm solution, singular
//! values below `max(T, p) · ε · σ_max` discarded), so collinear or
//! rank-deficient regressor sets still give finite coefficients.
//!
//! Fit quality per voxel is
//!
//! ```text
//! R² = 1 − Σ_t (ŷ_t − y_t)² / Σ_t y_t²
//! ```
//!
//! which is *not* mean-subtracted: it is the ratio against the raw signal
//! energy, not the conventional coefficient of determination.
use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

/// Fit of one slice: `V` voxels, `p` regressors, `T` timepoints.
#[derive(Debug, Clone)]
pub struct SliceFit {
    /// `[V, T]` observed − predicted.
    pub residuals: Array2<f64>,
    /// `[V]`
    pub rsq: Array1<f64>,
    /// `[V, p]`
    pub betas: Array2<f64>,
    /// Voxels whose coefficients came out non-finite and were zero-filled.
    pub n_degenerate: usize,
}

/// Regress `data` (`[V, T]`) on `regressors` (`[p, T]`).
///
/// Voxels whose coefficients are not finite (e.g. NaN input samples) get zero
/// betas and a zero prediction; they are counted in
/// [`SliceFit::n_degenerate`] and do not affect any other voxel.
pub fn fit_ols(regressors: &Array2<f64>, data: &Array2<f64>) -> Result<SliceFit> {
    let (p, n_t) = regressors.dim();
    let (n_vox, n_t_data) = data.dim();
    if n_t != n_t_data {
        return Err(anyhow!(
            "regressors have {n_t} timepoints, data has {n_t_data}"
        ));
    }

    let x = DMatrix::from_fn(n_t, p, |t, j| regressors[[j, t]]);
    let y = DMatrix::from_fn(n_t, n_vox, |t, v| data[[v, t]]);

    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let eps = n_t.max(p) as f64 * f64::EPSILON * max_sv;
    let mut beta = svd
        .solve(&y, eps)
        .map_err(|e| anyhow!("least squares solve failed: {e}"))?;

    let mut n_degenerate = 0;
    for mut col in beta.column_iter_mut() {
        if col.iter().any(|b| !b.is_finite()) {
            col.fill(0.0);
            n_degenerate += 1;
        }
    }

    let pred = &x * &beta;

    let mut residuals = Array2::zeros((n_vox, n_t));
    let mut rsq = Array1::zeros(n_vox);
    for v in 0..n_vox {
        let mut ss_res = 0.0;
        let mut ss_obs = 0.0;
        for t in 0..n_t {
            let obs = y[(t, v)];
            let d = pred[(t, v)] - obs;
            residuals[[v, t]] = obs - pred[(t, v)];
            ss_res += d * d;
            ss_obs += obs * obs;
        }
        rsq[v] = 1.0 - ss_res / ss_obs;
    }

    let betas = Array2::from_shape_fn((n_vox, p), |(v, j)| beta[(j, v)]);
    Ok(SliceFit {
        residuals,
        rsq,
        betas,
        n_degenerate,
    })
}
