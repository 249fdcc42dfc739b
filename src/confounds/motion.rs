//! Motion-parameter extension.
//!
//! From the six rigid-body parameters `P` (`[T, 6]`) the extended table is
//!
//! ```text
//! [ P | D₁ … Dₙ | D₁² … Dₙ² ]        6 × (2n + 1) columns
//! D₀ = P,   D_k = [ 1 ; diff(D_{k-1}) ]
//! ```
//!
//! where the leading row of ones keeps every derivative `T` rows long. `P`
//! is Savitzky–Golay detrended first (`P − trend`) when configured.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{concatenate, s, Array2, Axis};
use tracing::info;

use crate::config::ConfoundConfig;
use crate::detrend::remove_trend_rows;
use crate::error::DenoiseError;
use crate::nifti_io::{write_all_or_none, Writer};
use crate::table::{read_numeric_text, ConfoundTable};

pub const MOTION_COLUMNS: [&str; 6] = ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];

/// File name of the (optionally detrended) six-parameter table.
pub const BASE_MOTION_FILE: &str = "new_moco_pars.tsv";
/// File name of the extended table.
pub const EXTENDED_MOTION_FILE: &str = "ext_moco_pars.tsv";

#[derive(Debug, Clone, PartialEq)]
pub struct MotionTables {
    /// `[T, 6]`
    pub base: ConfoundTable,
    /// `[T, 6 · (2n + 1)]`
    pub extended: ConfoundTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionOutputs {
    pub base: PathBuf,
    pub extended: PathBuf,
}

/// Read a headerless six-column motion parameter file (`[T, 6]`).
pub fn read_motion_parameters(path: &Path) -> Result<Array2<f64>> {
    let pars = read_numeric_text(path)?;
    if pars.ncols() != MOTION_COLUMNS.len() {
        return Err(DenoiseError::shape(
            format!("motion parameters {}", path.display()),
            &[pars.nrows(), MOTION_COLUMNS.len()],
            pars.shape(),
        )
        .into());
    }
    Ok(pars)
}

/// `[1 ; diff(x)]` along time, per column.
fn unit_prefixed_diff(x: &Array2<f64>) -> Array2<f64> {
    let (n_t, n_c) = x.dim();
    let mut d = Array2::from_elem((n_t, n_c), 1.0);
    if n_t > 1 {
        let diff = &x.slice(s![1.., ..]) - &x.slice(s![..-1, ..]);
        d.slice_mut(s![1.., ..]).assign(&diff);
    }
    d
}

/// Build the base and extended motion tables from `pars` (`[T, 6]`).
///
/// `tr` is only used when `cfg.detrend` is set.
pub fn extend_motion_parameters(
    pars: &Array2<f64>,
    tr: f64,
    cfg: &ConfoundConfig,
) -> Result<MotionTables> {
    if pars.ncols() != MOTION_COLUMNS.len() {
        return Err(DenoiseError::shape(
            "motion parameters",
            &[pars.nrows(), MOTION_COLUMNS.len()],
            pars.shape(),
        )
        .into());
    }

    let base = match &cfg.detrend {
        Some(sg) => {
            let rows = pars.t().as_standard_layout().to_owned();
            remove_trend_rows(&rows, sg, tr)?.reversed_axes()
        }
        None => pars.clone(),
    };

    let orders = cfg.derivative_orders;
    let mut derivatives = Vec::with_capacity(orders);
    let mut prev = base.clone();
    for _ in 0..orders {
        prev = unit_prefixed_diff(&prev);
        derivatives.push(prev.clone());
    }
    let squared: Vec<Array2<f64>> = derivatives.iter().map(|d| d.mapv(|v| v * v)).collect();

    let mut blocks = vec![base.view()];
    blocks.extend(derivatives.iter().map(|d| d.view()));
    blocks.extend(squared.iter().map(|d| d.view()));
    let extended = concatenate(Axis(1), &blocks)?;

    let mut names: Vec<String> = MOTION_COLUMNS.iter().map(|c| c.to_string()).collect();
    for k in 1..=orders {
        names.extend(MOTION_COLUMNS.iter().map(|c| format!("{c}_derivative{k}")));
    }
    for k in 1..=orders {
        names.extend(MOTION_COLUMNS.iter().map(|c| format!("{c}_derivative{k}_power2")));
    }

    Ok(MotionTables {
        base: ConfoundTable::new(MOTION_COLUMNS.iter().map(|c| c.to_string()).collect(), base)?,
        extended: ConfoundTable::new(names, extended)?,
    })
}

/// Extend a motion parameter file and write [`BASE_MOTION_FILE`] and
/// [`EXTENDED_MOTION_FILE`] into `out_dir`.
pub fn extend_motion_file(
    par_file: &Path,
    out_dir: &Path,
    tr: f64,
    cfg: &ConfoundConfig,
) -> Result<(MotionTables, MotionOutputs)> {
    let pars = read_motion_parameters(par_file)?;
    let tables = extend_motion_parameters(&pars, tr, cfg)
        .with_context(|| format!("extending {}", par_file.display()))?;

    let outputs = MotionOutputs {
        base: out_dir.join(BASE_MOTION_FILE),
        extended: out_dir.join(EXTENDED_MOTION_FILE),
    };
    let jobs: [(&Path, Writer<'_>); 2] = [
        (outputs.base.as_path(), &|p: &Path| tables.base.write_tsv(p)),
        (outputs.extended.as_path(), &|p: &Path| tables.extended.write_tsv(p)),
    ];
    write_all_or_none(&jobs)?;
    info!(
        rows = tables.extended.n_rows(),
        cols = tables.extended.n_cols(),
        "motion parameters extended"
    );
    Ok((tables, outputs))
}
