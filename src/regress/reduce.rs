//! Component extraction for regressor sets.
//!
//! A regressor matrix `[n, T]` is treated as `T` observations of `n`
//! features and reduced to `[k, T]` derived time courses:
//!
//! * [`Reduction::Pca`]: centred thin SVD, scores `X · V_k` (equal to `U_k · S_k`)
//!   (`sklearn.decomposition.PCA(k).fit_transform(X.T).T`), with the sign of
//!   each component fixed so its largest-magnitude score is positive.
//! * [`Reduction::Ica`]: PCA whitening to `k` unit-variance components, then
//!   symmetric FastICA with the log-cosh contrast.
//! * [`Reduction::None`]: the matrix is returned unchanged.
use anyhow::Result;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::{debug, warn};

/// Closed set of component-extraction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Reduction {
    #[default]
    #[serde(rename = "none", alias = "None", alias = "NONE")]
    None,
    #[serde(rename = "pca", alias = "PCA", alias = "Pca")]
    Pca,
    #[serde(rename = "ica", alias = "ICA", alias = "Ica")]
    Ica,
}

/// FastICA solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcaParams {
    pub seed: u64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for IcaParams {
    fn default() -> Self {
        Self {
            seed: 0,
            max_iter: 200,
            tol: 1e-4,
        }
    }
}

impl Reduction {
    /// Reduce `[n, T]` regressors to `[k, T]` components.
    ///
    /// `k` is clamped to the rank bound `min(n, T)`. With `k == 0` or
    /// [`Reduction::None`] the input is returned as-is.
    pub fn reduce(&self, regressors: &Array2<f64>, k: usize) -> Result<Array2<f64>> {
        self.reduce_with(regressors, k, &IcaParams::default())
    }

    pub fn reduce_with(&self, regressors: &Array2<f64>, k: usize, ica: &IcaParams) -> Result<Array2<f64>> {
        if k == 0 || *self == Reduction::None {
            return Ok(regressors.clone());
        }
        let (n, n_t) = regressors.dim();
        let k_max = n.min(n_t);
        let k = if k > k_max {
            warn!(requested = k, available = k_max, "fewer components available than requested");
            k_max
        } else {
            k
        };
        if k == 0 {
            return Ok(Array2::zeros((0, n_t)));
        }

        let pcs = principal_components(regressors, k);
        match self {
            Reduction::Pca => Ok(pcs.scores),
            Reduction::Ica => fast_ica(&pcs, ica),
            Reduction::None => Ok(regressors.clone()),
        }
    }
}

/// Leading principal components of `[n, T]` (observations = time).
struct Components {
    /// `[k, T]` scores (`X · V_k`).
    scores: Array2<f64>,
    /// `[k, T]` left singular vectors (`U_k`ᵀ), unit norm.
    u: Array2<f64>,
    /// Leading singular values, descending.
    singular: Vec<f64>,
}

fn principal_components(regressors: &Array2<f64>, k: usize) -> Components {
    let (n, n_t) = regressors.dim();

    // X: [T, n], centred per feature.
    let mut x = DMatrix::from_fn(n_t, n, |t, j| regressors[[j, t]]);
    for j in 0..n {
        let mean = x.column(j).mean();
        x.column_mut(j).add_scalar_mut(-mean);
    }

    let svd = x.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Components {
            scores: Array2::zeros((k, n_t)),
            u: Array2::zeros((k, n_t)),
            singular: vec![0.0; k],
        };
    };

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    let s_max = order.first().map_or(0.0, |&i| svd.singular_values[i]);

    let mut scores = Array2::zeros((k, n_t));
    let mut u_k = Array2::zeros((k, n_t));
    let mut singular = Vec::with_capacity(k);
    for (c, &idx) in order.iter().take(k).enumerate() {
        let s = svd.singular_values[idx];
        // Scores as the projection of the centred data, so they stay
        // centred even when U picks up a constant direction.
        let proj = &x * v_t.row(idx).transpose();
        // Deterministic sign: largest-magnitude entry positive.
        let pivot = proj
            .iter()
            .copied()
            .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        let well_posed = s > s_max * 1e-12 && s > 0.0;
        for t in 0..n_t {
            scores[[c, t]] = sign * proj[t];
            u_k[[c, t]] = if well_posed {
                sign * proj[t] / s
            } else {
                sign * u[(t, idx)]
            };
        }
        singular.push(s);
    }
    debug!(k, n, n_t, "principal components extracted");
    Components { scores, u: u_k, singular }
}

/// Symmetric FastICA (log-cosh) on PCA-whitened data.
fn fast_ica(pcs: &Components, params: &IcaParams) -> Result<Array2<f64>> {
    let (k, n_t) = pcs.u.dim();
    let tiny = pcs.singular.first().copied().unwrap_or(0.0) * 1e-12;
    if pcs.singular.iter().any(|&s| s <= tiny) {
        warn!("regressor set is rank deficient, whitened components include null directions");
    }

    // Whitened data [k, T], unit variance per row.
    let scale = (n_t as f64).sqrt();
    let z = DMatrix::from_fn(k, n_t, |c, t| pcs.u[[c, t]] * scale);

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let w0 = DMatrix::from_fn(k, k, |_, _| standard_normal(&mut rng));
    let mut w = symmetric_decorrelation(w0);

    let inv_t = 1.0 / n_t as f64;
    let mut converged = false;
    for iter in 0..params.max_iter {
        let wx = &w * &z;
        let g = wx.map(f64::tanh);
        let g_prime_mean: Vec<f64> = (0..k)
            .map(|r| g.row(r).iter().map(|v| 1.0 - v * v).sum::<f64>() * inv_t)
            .collect();

        let mut w1 = (&g * z.transpose()) * inv_t;
        for r in 0..k {
            for c in 0..k {
                w1[(r, c)] -= g_prime_mean[r] * w[(r, c)];
            }
        }
        let w1 = symmetric_decorrelation(w1);

        let lim = (&w1 * w.transpose())
            .diagonal()
            .iter()
            .map(|d| (d.abs() - 1.0).abs())
            .fold(0.0_f64, f64::max);
        w = w1;
        if lim < params.tol {
            debug!(iterations = iter + 1, "FastICA converged");
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(max_iter = params.max_iter, "FastICA did not converge, using last estimate");
    }

    let sources = &w * &z;
    Ok(Array2::from_shape_fn((k, n_t), |(c, t)| sources[(c, t)]))
}

/// `W ← (W Wᵀ)^{-1/2} W`.
fn symmetric_decorrelation(w: DMatrix<f64>) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(&w * w.transpose());
    let inv_sqrt = eig
        .eigenvalues
        .map(|v| if v > f64::EPSILON { 1.0 / v.sqrt() } else { 0.0 });
    let q = &eig.eigenvectors;
    q * DMatrix::from_diagonal(&inv_sqrt) * q.transpose() * w
}

/// Box–Muller standard normal draw.
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-300);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
