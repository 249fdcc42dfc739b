//! Savitzky–Golay detrending along the time axis.
//!
//! The smoother's output is treated as the slow trend and removed:
//!
//! ```text
//! y = x − trend + mean(trend)
//! ```
//!
//! so the mean level of every series is preserved. Motion parameters use the
//! plain residual `x − trend` instead (see [`remove_trend_rows`]).
//!
//! The window is given in seconds and converted with the repetition time,
//! which is first passed through
//! [`normalize_sampling_interval`](crate::filter::normalize_sampling_interval).
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use ndarray::Array2;
use tracing::info;

use crate::config::SgConfig;
use crate::filter::{
    convolve_rows, design_savgol, normalize_sampling_interval, validate_window, window_samples,
};
use crate::nifti_io::{derived_path, image_stem, read_volume, write_image, VolumeSeries};
use crate::table::ConfoundTable;

/// A Savitzky–Golay smoother resolved for one TR and one series length.
#[derive(Debug, Clone)]
pub struct SgSmoother {
    /// Odd window in samples.
    pub window: usize,
    /// Sampling interval in seconds, after normalisation.
    pub tr: f64,
    kernel: Vec<f64>,
}

impl SgSmoother {
    /// Resolve the window for `n_t` samples at repetition time `tr`.
    ///
    /// Fails with [`DenoiseError::InvalidWindow`](crate::DenoiseError) when
    /// the window in samples is not shorter than the series or not longer
    /// than the polynomial order.
    pub fn new(cfg: &SgConfig, tr: f64, n_t: usize) -> Result<Self> {
        let tr = normalize_sampling_interval(tr);
        let window = window_samples(cfg.window_length, tr)?;
        validate_window(window, cfg.polyorder, n_t)?;
        let kernel = design_savgol(window, cfg.polyorder, cfg.deriv, tr)?;
        Ok(Self { window, tr, kernel })
    }

    /// Smoothed copy of every row of `data` (`[N, T]`).
    ///
    /// Non-finite samples are filled from the nearest finite sample of their
    /// row before smoothing, so a missing value (`n/a` in a confound file)
    /// only affects its own position once the trend is subtracted.
    pub fn trend(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let mut trend = data.as_standard_layout().to_owned();
        for mut row in trend.rows_mut() {
            if let Some(row) = row.as_slice_mut() {
                fill_non_finite(row);
            }
        }
        convolve_rows(&mut trend, &self.kernel)?;
        Ok(trend)
    }

    /// Filter taps, in the order [`convolve_rows`] applies them.
    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }
}

/// Replace non-finite samples with the nearest finite one (earlier sample on
/// ties). A row with no finite sample becomes all zeros.
fn fill_non_finite(row: &mut [f64]) {
    if row.iter().all(|v| v.is_finite()) {
        return;
    }
    let finite: Vec<usize> = (0..row.len()).filter(|&i| row[i].is_finite()).collect();
    if finite.is_empty() {
        row.fill(0.0);
        return;
    }
    let mut next = 0;
    for i in 0..row.len() {
        while next + 1 < finite.len() && finite[next + 1] <= i {
            next += 1;
        }
        if row[i].is_finite() {
            continue;
        }
        let before = finite[next];
        let nearest = match finite.get(next + 1) {
            _ if before > i => before,
            Some(&after) if after - i < i - before => after,
            _ => before,
        };
        row[i] = row[nearest];
    }
}

/// Detrend every row of `data` (`[N, T]`) and re-centre on the trend mean.
pub fn detrend_rows(data: &Array2<f64>, cfg: &SgConfig, tr: f64) -> Result<Array2<f64>> {
    let smoother = SgSmoother::new(cfg, tr, data.ncols())?;
    let trend = smoother.trend(data)?;
    let mut out = data - &trend;
    for (mut row, t) in out.rows_mut().into_iter().zip(trend.rows()) {
        let mean = t.mean().unwrap_or(0.0);
        row += mean;
    }
    Ok(out)
}

/// `x − trend` for every row of `data` (`[N, T]`), without re-centring.
pub fn remove_trend_rows(data: &Array2<f64>, cfg: &SgConfig, tr: f64) -> Result<Array2<f64>> {
    let smoother = SgSmoother::new(cfg, tr, data.ncols())?;
    let trend = smoother.trend(data)?;
    Ok(data - &trend)
}

/// Detrend every voxel time series of a run.
///
/// `tr` overrides the header repetition time.
pub fn detrend_series(series: &VolumeSeries, cfg: &SgConfig, tr: Option<f64>) -> Result<VolumeSeries> {
    let (nx, ny, nz, n_t) = series.dims();
    let tr = tr.unwrap_or_else(|| series.header_tr());
    let rows = series
        .data
        .as_standard_layout()
        .to_owned()
        .into_shape((nx * ny * nz, n_t))?;
    let filtered = detrend_rows(&rows, cfg, tr)?.into_shape((nx, ny, nz, n_t))?;
    Ok(series.with_data(filtered))
}

/// Detrend every column of a confound table (columns are time series).
pub fn detrend_table(table: &ConfoundTable, cfg: &SgConfig, tr: f64) -> Result<ConfoundTable> {
    let rows = table.data.t().as_standard_layout().to_owned();
    let filtered = detrend_rows(&rows, cfg, tr)?;
    ConfoundTable::new(table.names.clone(), filtered.reversed_axes())
}

/// Detrend an image file and write `<stem>_sg` into `out_dir`.
pub fn savgol_filter_image(
    in_file: &Path,
    out_dir: &Path,
    cfg: &SgConfig,
    tr: Option<f64>,
) -> Result<PathBuf> {
    let start = Instant::now();
    let series = read_volume(in_file)?;
    let filtered = detrend_series(&series, cfg, tr)?;
    let out = derived_path(in_file, out_dir, "_sg");
    write_image(&out, &filtered.data, &filtered.header)?;
    info!(
        input = %in_file.display(),
        output = %out.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "image detrended"
    );
    Ok(out)
}

/// Detrend a confound TSV column-wise and write `<stem>_sg.tsv` into
/// `out_dir`. Confound tables carry no header TR, so `tr` is required.
pub fn savgol_filter_confounds(
    in_file: &Path,
    out_dir: &Path,
    cfg: &SgConfig,
    tr: f64,
) -> Result<PathBuf> {
    let table = ConfoundTable::read_tsv(in_file)?;
    let filtered = detrend_table(&table, cfg, tr)?;
    let stem = image_stem(in_file);
    let stem = stem.strip_suffix(".tsv").unwrap_or(&stem);
    let out = out_dir.join(format!("{stem}_sg.tsv"));
    filtered.write_tsv(&out)?;
    Ok(out)
}
