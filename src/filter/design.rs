//! Savitzky–Golay kernel design, matching `scipy.signal.savgol_coeffs`.
//!
//! For a window of `N = 2m + 1` samples and polynomial order `p`:
//!   • positions x = −m … m
//!   • Vandermonde A[i, j] = x_jⁱ           (i ≤ p)
//!   • right-hand side y = e_d · d! / Δᵈ    (d = derivative order, Δ = sample spacing)
//!   • coefficients c = argmin ‖c‖ s.t. A c = y   (SVD least squares)
//!
//! The returned kernel is in convolution order (c reversed) so it can be
//! handed straight to [`crate::filter::filter_1d`].
use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::DenoiseError;

/// Sampling intervals below this are multiplied by 1000.
pub const TR_MIN_PLAUSIBLE: f64 = 0.01;

/// Sampling intervals above this are taken as milliseconds and divided by 1000.
pub const TR_MAX_PLAUSIBLE: f64 = 20.0;

/// Normalise a repetition time to seconds by plausibility.
///
/// Image headers store the repetition time inconsistently (seconds or
/// milliseconds). Values below [`TR_MIN_PLAUSIBLE`] are multiplied by 1000,
/// values above [`TR_MAX_PLAUSIBLE`] are divided by 1000, anything else is
/// returned unchanged.
///
/// This is a heuristic: a genuine TR outside (0.01 s, 20 s] is silently
/// rescaled. Pass an explicit TR in seconds where the header is known to be
/// unreliable.
pub fn normalize_sampling_interval(tr: f64) -> f64 {
    if tr < TR_MIN_PLAUSIBLE {
        let fixed = tr * 1000.0;
        warn!(tr, rescaled = fixed, "implausibly small sampling interval, rescaled x1000");
        fixed
    } else if tr > TR_MAX_PLAUSIBLE {
        let fixed = tr / 1000.0;
        warn!(tr, rescaled = fixed, "implausibly large sampling interval, rescaled /1000");
        fixed
    } else {
        tr
    }
}

/// Convert a window length in seconds to an **odd** number of samples.
///
/// `round(window_length / tr)`, incremented by one when even.
pub fn window_samples(window_length: f64, tr: f64) -> Result<usize> {
    let ratio = window_length / tr;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(DenoiseError::InvalidWindow {
            window: 0,
            polyorder: 0,
            n_samples: 0,
        }
        .into());
    }
    let n = ratio.round() as usize;
    let n = if n % 2 == 0 { n + 1 } else { n };
    debug!(window_length, tr, window = n, "filter window");
    Ok(n)
}

/// Reject windows the smoother cannot use on a series of `n_samples`.
///
/// The window must be odd, shorter than the series, and longer than the
/// polynomial order.
pub fn validate_window(window: usize, polyorder: usize, n_samples: usize) -> Result<()> {
    if window == 0 || window % 2 == 0 || window >= n_samples || polyorder >= window {
        return Err(DenoiseError::InvalidWindow {
            window,
            polyorder,
            n_samples,
        }
        .into());
    }
    Ok(())
}

/// Design a Savitzky–Golay kernel (convolution order).
///
/// `delta` is the sample spacing and only matters for `deriv > 0`.
pub fn design_savgol(window: usize, polyorder: usize, deriv: usize, delta: f64) -> Result<Vec<f64>> {
    if window % 2 == 0 || polyorder >= window {
        return Err(DenoiseError::InvalidWindow {
            window,
            polyorder,
            n_samples: window,
        }
        .into());
    }
    if deriv > polyorder {
        // Derivative of higher order than the fitted polynomial is identically zero.
        return Ok(vec![0.0; window]);
    }

    let half = (window / 2) as f64;
    let n_rows = polyorder + 1;
    let a = DMatrix::from_fn(n_rows, window, |i, j| (j as f64 - half).powi(i as i32));

    let mut y = DVector::zeros(n_rows);
    y[deriv] = factorial(deriv) / delta.powi(deriv as i32);

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let eps = f64::EPSILON * window as f64 * max_sv;
    let c = svd
        .solve(&y, eps)
        .map_err(|e| anyhow!("savgol least squares failed: {e}"))?;

    // Dot order → convolution order.
    Ok(c.iter().rev().copied().collect())
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}
