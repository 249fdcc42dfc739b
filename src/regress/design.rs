//! Per-slice regressor assembly.
//!
//! For slice `z` the regressor set is `[n_regressors, T]`:
//!
//! ```text
//! row 0                 intercept, all ones
//! rows 1 ..= S          per-slice regressors, row z of each [Z, T] input
//! rows S+1 ..           per-timepoint regressors, identical for every slice
//! ```
//!
//! Non-finite entries are replaced by zero. The intercept is written last,
//! so it is exactly one whatever the other inputs contain.
use ndarray::{s, Array2};

/// Number of rows [`assemble_slice_regressors`] will produce.
pub fn n_regressors(per_slice: &[Array2<f64>], per_timepoint: Option<&Array2<f64>>) -> usize {
    1 + per_slice.len() + per_timepoint.map_or(0, |r| r.nrows())
}

/// Build the regressor set for `slice`.
///
/// * `per_slice`     – each `[n_slices, n_t]`.
/// * `per_timepoint` – `[n, n_t]`, broadcast to every slice.
///
/// Shapes are validated by the caller.
pub fn assemble_slice_regressors(
    slice: usize,
    per_slice: &[Array2<f64>],
    per_timepoint: Option<&Array2<f64>>,
    n_t: usize,
) -> Array2<f64> {
    let n = n_regressors(per_slice, per_timepoint);
    let mut out = Array2::<f64>::zeros((n, n_t));

    for (i, reg) in per_slice.iter().enumerate() {
        out.row_mut(1 + i).assign(&reg.row(slice));
    }
    if let Some(vol) = per_timepoint {
        let start = 1 + per_slice.len();
        out.slice_mut(s![start.., ..]).assign(vol);
    }

    out.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    out.row_mut(0).fill(1.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intercept_only_by_default() {
        let r = assemble_slice_regressors(0, &[], None, 12);
        assert_eq!(r.dim(), (1, 12));
        assert!(r.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn row_layout_and_broadcast() {
        let n_t = 5;
        let ps = Array2::from_shape_fn((3, n_t), |(z, t)| (10 * z + t) as f64);
        let vol = Array2::from_shape_fn((2, n_t), |(r, t)| -((r * 100 + t) as f64));
        for z in 0..3 {
            let r = assemble_slice_regressors(z, &[ps.clone()], Some(&vol), n_t);
            assert_eq!(r.dim(), (4, n_t));
            assert_eq!(r.row(1), ps.row(z));
            assert_eq!(r.row(2), vol.row(0));
            assert_eq!(r.row(3), vol.row(1));
        }
    }

    #[test]
    fn non_finite_replaced_and_intercept_untouched() {
        let n_t = 4;
        let mut ps = Array2::from_elem((1, n_t), 2.0);
        ps[[0, 1]] = f64::NAN;
        ps[[0, 3]] = f64::INFINITY;
        let r = assemble_slice_regressors(0, &[ps], None, n_t);
        assert_eq!(r.row(1).to_vec(), vec![2.0, 0.0, 2.0, 0.0]);
        assert!(r.row(0).iter().all(|&v| v == 1.0));
    }
}
