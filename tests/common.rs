/// Shared helpers: synthetic runs and temporary input files.
use fmri_denoise::write_image;
use ndarray::{Array2, Array3, Array4};
use nifti::NiftiHeader;
use std::path::{Path, PathBuf};

#[allow(unused)]
/// Header with isotropic `voxel` mm voxels and repetition time `tr` s.
pub fn header(voxel: f32, tr: f32) -> NiftiHeader {
    let mut h = NiftiHeader::default();
    h.pixdim = [1.0, voxel, voxel, voxel, tr, 0.0, 0.0, 0.0];
    h.sform_code = 0;
    h.qform_code = 0;
    h
}

#[allow(unused)]
/// Deterministic pseudo-random value in [-0.5, 0.5).
pub fn hash_noise(i: usize) -> f64 {
    let mut x = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03;
    x ^= x >> 31;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 29;
    (x >> 11) as f64 / (1u64 << 53) as f64 - 0.5
}

#[allow(unused)]
/// `[X, Y, Z, T]` run: per-voxel baseline, slow drift, a shared nuisance
/// wave and a little noise.
pub fn synthetic_run(dims: (usize, usize, usize, usize)) -> Array4<f64> {
    let (nx, ny, nz, n_t) = dims;
    Array4::from_shape_fn(dims, |(x, y, z, t)| {
        let base = 500.0 + 10.0 * (x + ny * y + nx * ny * z) as f64;
        let drift = 0.05 * t as f64;
        let nuisance = 3.0 * (t as f64 * 0.37).sin();
        let idx = ((x * ny + y) * nz + z) * n_t + t;
        base + drift + nuisance + hash_noise(idx)
    })
}

#[allow(unused)]
pub fn write_volume(dir: &Path, name: &str, data: &Array4<f64>, tr: f32) -> PathBuf {
    let path = dir.join(name);
    write_image(&path, data, &header(2.0, tr)).unwrap();
    path
}

#[allow(unused)]
pub fn write_volume3(dir: &Path, name: &str, data: &Array3<f64>) -> PathBuf {
    let path = dir.join(name);
    write_image(&path, data, &header(2.0, 0.0)).unwrap();
    path
}

#[allow(unused)]
/// Whitespace-separated numeric text, one row per line.
pub fn write_matrix(dir: &Path, name: &str, m: &Array2<f64>) -> PathBuf {
    let text: String = m
        .rows()
        .into_iter()
        .map(|r| r.iter().map(|v| format!("{v:.8}")).collect::<Vec<_>>().join(" ") + "\n")
        .collect();
    write_text(dir, name, &text)
}

#[allow(unused)]
pub fn write_text(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[allow(unused)]
/// `[T, 6]` motion parameters with drift and jitter.
pub fn motion_parameters(n_t: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_t, 6), |(t, c)| {
        0.002 * t as f64 * (c + 1) as f64 + 0.05 * (t as f64 * 0.21 * (c + 1) as f64).sin()
            + 0.01 * hash_noise(t * 6 + c)
    })
}

#[allow(unused)]
/// Names of the files in `dir`, sorted.
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[allow(unused)]
/// Maximum absolute difference between two equally shaped arrays.
pub fn max_abs_diff<'a>(a: impl IntoIterator<Item = &'a f64>, b: impl IntoIterator<Item = &'a f64>) -> f64 {
    a.into_iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0_f64, f64::max)
}
