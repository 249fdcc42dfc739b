//! Anatomical-compartment (aCompCor) regressors.
//!
//! White-matter and CSF probability maps are thresholded, optionally eroded,
//! and combined by union. Voxel time series inside the mask are centred and
//! variance-normalised, and the leading components of that signal become
//! confound columns `a_comp_cor_00`, `a_comp_cor_01`, …
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use ndarray::{Array2, Array3, Zip};
use tracing::{debug, info, warn};

use crate::config::ConfoundConfig;
use crate::error::DenoiseError;
use crate::nifti_io::{image_stem, read_volume, read_volume3, VolumeSeries};
use crate::regress::{IcaParams, Reduction};
use crate::table::ConfoundTable;

/// Binary mask of voxels with probability strictly above `threshold`.
pub fn threshold_mask(prob: &Array3<f64>, threshold: f64) -> Array3<bool> {
    prob.mapv(|p| p > threshold)
}

/// Erosion iterations for a margin in millimetres.
pub fn erosion_iterations(erosion_mm: f64, voxel_size: [f64; 3]) -> usize {
    if erosion_mm <= 0.0 {
        return 0;
    }
    let min_dim = voxel_size
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !min_dim.is_finite() {
        warn!(?voxel_size, "no usable voxel size, mask not eroded");
        return 0;
    }
    (erosion_mm / min_dim).round() as usize
}

/// 6-connected binary erosion, repeated `iterations` times.
///
/// A voxel survives one pass only if it and all six face neighbours are set.
/// Voxels on the volume border are always removed.
pub fn erode(mask: &Array3<bool>, iterations: usize) -> Array3<bool> {
    let (nx, ny, nz) = mask.dim();
    let mut cur = mask.clone();
    for _ in 0..iterations {
        let prev = cur.clone();
        for ((i, j, k), v) in cur.indexed_iter_mut() {
            if !*v {
                continue;
            }
            if i == 0 || i + 1 == nx || j == 0 || j + 1 == ny || k == 0 || k + 1 == nz {
                *v = false;
                continue;
            }
            *v = prev[[i - 1, j, k]]
                && prev[[i + 1, j, k]]
                && prev[[i, j - 1, k]]
                && prev[[i, j + 1, k]]
                && prev[[i, j, k - 1]]
                && prev[[i, j, k + 1]];
        }
    }
    cur
}

/// Threshold, erode and union the compartment probability maps.
///
/// Every map must have shape `spatial`.
pub fn compartment_mask(
    probability_maps: &[&Array3<f64>],
    spatial: [usize; 3],
    voxel_size: [f64; 3],
    cfg: &ConfoundConfig,
) -> Result<Array3<bool>> {
    let iterations = erosion_iterations(cfg.erosion_mm, voxel_size);
    let mut union = Array3::from_elem((spatial[0], spatial[1], spatial[2]), false);
    for (i, prob) in probability_maps.iter().enumerate() {
        if prob.shape() != spatial {
            return Err(DenoiseError::shape(format!("compartment mask {i}"), &spatial, prob.shape()).into());
        }
        let mask = erode(&threshold_mask(prob, cfg.mask_threshold), iterations);
        debug!(
            map = i,
            voxels = mask.iter().filter(|&&v| v).count(),
            iterations,
            "compartment mask"
        );
        Zip::from(&mut union).and(&mask).for_each(|u, &m| *u |= m);
    }
    Ok(union)
}

/// Leading components of the signal inside `mask` as a `[T, k]` table.
///
/// Fewer than `cfg.n_compcor` columns are returned when the mask holds fewer
/// usable voxels; an empty mask gives an empty table.
pub fn extract_components(
    series: &VolumeSeries,
    mask: &Array3<bool>,
    cfg: &ConfoundConfig,
) -> Result<ConfoundTable> {
    let spatial = series.spatial_shape();
    if mask.shape() != spatial {
        return Err(DenoiseError::shape("compartment mask", &spatial, mask.shape()).into());
    }
    let n_t = series.n_timepoints();

    let mut signal = Vec::new();
    let mut n_vox = 0;
    for ((x, y, z), &inside) in mask.indexed_iter() {
        if !inside {
            continue;
        }
        let ts = series.data.slice(ndarray::s![x, y, z, ..]);
        if ts.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let mean = ts.mean().unwrap_or(0.0);
        let sd = ts.std(0.0);
        if sd <= f64::EPSILON * mean.abs().max(1.0) {
            continue;
        }
        signal.extend(ts.iter().map(|v| (v - mean) / sd));
        n_vox += 1;
    }

    let method = match cfg.compcor_method {
        Reduction::None => Reduction::Pca,
        m => m,
    };
    if n_vox == 0 || cfg.n_compcor == 0 || n_t == 0 {
        if n_vox == 0 {
            warn!("compartment mask holds no usable voxels, no components extracted");
        }
        return ConfoundTable::new(vec![], Array2::zeros((n_t, 0)));
    }

    let voxels = Array2::from_shape_vec((n_vox, n_t), signal)?;
    let comps = method.reduce_with(&voxels, cfg.n_compcor, &IcaParams::default())?;
    let names = (0..comps.nrows()).map(|i| format!("a_comp_cor_{i:02}")).collect();
    debug!(voxels = n_vox, components = comps.nrows(), "compartment components");
    ConfoundTable::new(names, comps.reversed_axes())
}

/// Build the compartment mask from probability-map files and extract
/// components from `in_file`. Writes `<stem>_acompcor.tsv` into `out_dir`.
pub fn compcor_file(
    in_file: &Path,
    probability_maps: &[PathBuf],
    out_dir: &Path,
    cfg: &ConfoundConfig,
) -> Result<(ConfoundTable, PathBuf)> {
    let start = Instant::now();
    let series = read_volume(in_file)?;
    let table = compcor_from_series(&series, probability_maps, cfg)?;
    let out = out_dir.join(format!("{}_acompcor.tsv", image_stem(in_file)));
    table.write_tsv(&out)?;
    info!(
        input = %in_file.display(),
        components = table.n_cols(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "compartment regressors extracted"
    );
    Ok((table, out))
}

/// As [`compcor_file`] for an image already in memory; nothing is written.
pub fn compcor_from_series(
    series: &VolumeSeries,
    probability_maps: &[PathBuf],
    cfg: &ConfoundConfig,
) -> Result<ConfoundTable> {
    let maps = probability_maps
        .iter()
        .map(|p| read_volume3(p).map(|(data, _)| data))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Array3<f64>> = maps.iter().collect();
    let mask = compartment_mask(&refs, series.spatial_shape(), series.voxel_size(), cfg)?;
    extract_components(series, &mask, cfg)
}
