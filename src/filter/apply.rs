//! Overlap-add zero-phase FIR convolution.
//!
//! Zero-phase is achieved by shifting the output left by `(N-1)/2` samples.
//! Edges are handled by `nearest` padding: the first and last samples are
//! repeated `N-1` times on each side, which makes the result identical to
//! `scipy.ndimage.correlate1d(..., mode='nearest')` with the reversed kernel.
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::Array2;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// A planned overlap-add convolution for one kernel and one series length.
///
/// Planning once and sharing the plan lets every row of a `[N, T]` matrix be
/// filtered in parallel without re-planning FFTs.
pub struct OverlapAdd {
    n_h: usize,
    n_x: usize,
    n_fft: usize,
    h_fft: Vec<Complex<f64>>,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
}

impl OverlapAdd {
    /// Plan a convolution of `h` (odd length) with series of `n_x` samples.
    pub fn new(h: &[f64], n_x: usize) -> Result<Self> {
        let n_h = h.len();
        if n_h == 0 || n_h % 2 == 0 {
            bail!("zero-phase FIR needs an odd, non-empty kernel (got {n_h} taps)");
        }
        let n_ext = n_x + 2 * (n_h - 1);
        let n_fft = choose_fft_len(n_h, n_ext);

        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n_fft);
        let inv = planner.plan_fft_inverse(n_fft);

        let mut h_fft: Vec<Complex<f64>> = h
            .iter()
            .map(|&v| Complex { re: v, im: 0.0 })
            .chain(std::iter::repeat(Complex::default()))
            .take(n_fft)
            .collect();
        fwd.process(&mut h_fft);

        Ok(Self { n_h, n_x, n_fft, h_fft, fwd, inv })
    }

    /// Filter one series. `x.len()` must equal the planned length.
    pub fn apply(&self, x: &[f64]) -> Result<Vec<f64>> {
        if x.len() != self.n_x {
            bail!("series length {} does not match planned length {}", x.len(), self.n_x);
        }
        if x.is_empty() {
            return Ok(vec![]);
        }

        let n_h = self.n_h;
        let shift = (n_h - 1) / 2;
        let n_edge = n_h - 1;

        let x_ext = nearest_pad(x, n_edge, n_edge);
        let n_ext = x_ext.len();

        let n_seg = self.n_fft - n_h + 1;
        let n_segments = n_ext.div_ceil(n_seg);
        let mut x_filtered = vec![0.0_f64; n_ext];
        let inv_scale = 1.0 / self.n_fft as f64;

        for seg_idx in 0..n_segments {
            let start = seg_idx * n_seg;
            let stop = (start + n_seg).min(n_ext);

            let mut buf: Vec<Complex<f64>> = x_ext[start..stop]
                .iter()
                .map(|&v| Complex { re: v, im: 0.0 })
                .chain(std::iter::repeat(Complex::default()))
                .take(self.n_fft)
                .collect();

            self.fwd.process(&mut buf);
            for (b, &hf) in buf.iter_mut().zip(self.h_fft.iter()) {
                *b *= hf;
            }
            self.inv.process(&mut buf);

            // Accumulate, accounting for the zero-phase shift.
            let out_start = start.saturating_sub(shift);
            let out_end = (out_start + self.n_fft).min(n_ext);
            let prod_start = shift.saturating_sub(start);

            for (o, p) in (out_start..out_end).zip(prod_start..) {
                if p < buf.len() {
                    x_filtered[o] += buf[p].re * inv_scale;
                }
            }
        }

        Ok(x_filtered[n_edge..n_edge + x.len()].to_vec())
    }
}

/// Filter every row of `data` ([N, T]) in place, rows in parallel.
pub fn convolve_rows(data: &mut Array2<f64>, h: &[f64]) -> Result<()> {
    let n_t = data.ncols();
    if data.nrows() == 0 || n_t == 0 {
        return Ok(());
    }
    let plan = OverlapAdd::new(h, n_t)?;

    if !data.is_standard_layout() {
        *data = data.as_standard_layout().to_owned();
    }
    let Some(flat) = data.as_slice_mut() else {
        bail!("filter input is not contiguous");
    };
    flat.par_chunks_mut(n_t).try_for_each(|row| -> Result<()> {
        let filtered = plan.apply(row)?;
        row.copy_from_slice(&filtered);
        Ok(())
    })
}

/// Filter a single 1-D signal. Returns a vector of the same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Result<Vec<f64>> {
    if x.is_empty() {
        return Ok(vec![]);
    }
    OverlapAdd::new(h, x.len())?.apply(x)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Edge-value padding (`mode='nearest'`).
///
/// Left:  `n_l` copies of `x[0]`;  right: `n_r` copies of `x[-1]`.
fn nearest_pad(x: &[f64], n_l: usize, n_r: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n_l + n + n_r);
    out.extend(std::iter::repeat(x[0]).take(n_l));
    out.extend_from_slice(x);
    out.extend(std::iter::repeat(x[n - 1]).take(n_r));
    out
}

/// Choose the FFT block size (power of 2 minimising operation count).
///
///   `cost = ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;

    let max_pow = (n_x as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow.max(min_pow);
    let mut best_cost = f64::INFINITY;

    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}
