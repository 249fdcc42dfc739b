//! NIfTI image I/O.
//!
//! Reading goes through the `nifti` crate (`.nii` and `.nii.gz`, scaling
//! applied). Writing is atomic: data is written to a hidden temporary file
//! next to the destination and renamed into place only once the whole image
//! is on disk, so a failed stage never leaves a truncated output behind.
//!
//! Array index order is `[x, y, z, t]`, matching the NIfTI `dim[1..]` order.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array, Array2, Array3, Array4, ArrayD, Axis, Dimension, Ix3, Ix4, RemoveAxis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use tracing::{debug, info};

use crate::error::DenoiseError;

/// A 4-D image `[X, Y, Z, T]` with the header it was read from.
///
/// The header carries the affine, voxel sizes and repetition time and is
/// reused as the reference header for every image derived from this one.
#[derive(Debug, Clone)]
pub struct VolumeSeries {
    pub data: Array4<f64>,
    pub header: NiftiHeader,
}

impl VolumeSeries {
    /// Wrap an array with a header.
    pub fn new(data: Array4<f64>, header: NiftiHeader) -> Self {
        Self { data, header }
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        let (x, y, z, _) = self.data.dim();
        [x, y, z]
    }

    pub fn n_slices(&self) -> usize {
        self.data.dim().2
    }

    pub fn n_timepoints(&self) -> usize {
        self.data.dim().3
    }

    /// Voxel size in mm (`pixdim[1..4]`).
    pub fn voxel_size(&self) -> [f64; 3] {
        let p = self.header.pixdim;
        [p[1] as f64, p[2] as f64, p[3] as f64]
    }

    /// Repetition time as stored in the header (`pixdim[4]`), unnormalised.
    pub fn header_tr(&self) -> f64 {
        self.header.pixdim[4] as f64
    }

    /// Same header, new data.
    pub fn with_data(&self, data: Array4<f64>) -> Self {
        Self {
            data,
            header: self.header.clone(),
        }
    }
}

/// Read any image as a dynamic-dimension `f64` array plus its header.
pub fn read_image(path: &Path) -> Result<(ArrayD<f64>, NiftiHeader)> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("failed to read NIfTI {}", path.display()))?;
    let header = obj.header().clone();
    let data = obj
        .into_volume()
        .into_ndarray::<f64>()
        .with_context(|| format!("failed to convert {} to an array", path.display()))?;
    debug!(path = %path.display(), shape = ?data.shape(), "image read");
    Ok((data, header))
}

/// Read a 3-D or 4-D image as a [`VolumeSeries`].
pub fn read_volume(path: &Path) -> Result<VolumeSeries> {
    let (data, header) = read_image(path)?;
    let data = match data.ndim() {
        3 => data.into_dimensionality::<Ix3>()?.insert_axis(Axis(3)),
        4 => data.into_dimensionality::<Ix4>()?,
        _ => {
            return Err(DenoiseError::shape(
                format!("image {}", path.display()),
                &[0, 0, 0, 0],
                data.shape(),
            )
            .into())
        }
    };
    Ok(VolumeSeries::new(data, header))
}

/// Read a 3-D image (masks, probability maps). Trailing singleton axes are
/// dropped.
pub fn read_volume3(path: &Path) -> Result<(Array3<f64>, NiftiHeader)> {
    let (mut data, header) = read_image(path)?;
    while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    if data.ndim() != 3 {
        return Err(DenoiseError::shape(
            format!("3-D image {}", path.display()),
            &[0, 0, 0],
            data.shape(),
        )
        .into());
    }
    Ok((data.into_dimensionality::<Ix3>()?, header))
}

/// Read a per-slice regressor image and collapse it to `[n_slices, n_t]`.
///
/// The file may have any number of singleton axes (e.g. `[1, 1, Z, T]`);
/// after squeezing them it must be exactly `[n_slices, n_t]`.
pub fn read_slice_regressor(path: &Path, n_slices: usize, n_t: usize) -> Result<Array2<f64>> {
    let (data, _) = read_image(path)?;
    let squeezed: Vec<usize> = data.shape().iter().copied().filter(|&d| d != 1).collect();
    let fits = squeezed == [n_slices, n_t]
        || (n_slices == 1 && squeezed == [n_t])
        || (n_t == 1 && squeezed == [n_slices])
        || (n_slices == 1 && n_t == 1 && squeezed.is_empty());
    if !fits {
        return Err(DenoiseError::shape(
            format!("slice regressor {}", path.display()),
            &[n_slices, n_t],
            data.shape(),
        )
        .into());
    }
    // Logical (row-major) iteration keeps slice-major, time-minor order.
    let values: Vec<f64> = data.iter().copied().collect();
    Ok(Array2::from_shape_vec((n_slices, n_t), values)?)
}

/// Atomically write `data` as an `f32` image using `reference` for geometry.
///
/// The dimensions and datatype come from the array; affine, voxel sizes and
/// TR come from the reference header. Intensity scaling is reset.
pub fn write_image<D>(path: &Path, data: &Array<f64, D>, reference: &NiftiHeader) -> Result<()>
where
    D: Dimension + RemoveAxis,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let suffix = if is_gzipped(path) { ".nii.gz" } else { ".nii" };
    let tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(suffix)
        .tempfile_in(&dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;

    let mut header = reference.clone();
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;

    let data32 = data.mapv(|v| v as f32);
    WriterOptions::new(tmp.path())
        .reference_header(&header)
        .write_nifti(&data32)
        .with_context(|| format!("failed to write NIfTI {}", path.display()))?;

    tmp.persist(path)
        .with_context(|| format!("failed to move image into place at {}", path.display()))?;
    info!(path = %path.display(), shape = ?data.shape(), "image written");
    Ok(())
}

pub type Writer<'a> = &'a dyn Fn(&Path) -> Result<()>;

/// Output group writer.
///
/// Run each writer in order; on the first failure remove the files already
/// written by earlier jobs and return the error.
pub fn write_all_or_none(jobs: &[(&Path, Writer<'_>)]) -> Result<()> {
    for (i, (path, write)) in jobs.iter().enumerate() {
        if let Err(err) = write(path) {
            for (done, _) in &jobs[..i] {
                let _ = std::fs::remove_file(done);
            }
            return Err(err);
        }
    }
    Ok(())
}

fn is_gzipped(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// File name without the image extension (`.nii.gz` or `.nii`).
pub fn image_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in [".nii.gz", ".nii", ".gz"] {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    name
}

/// `<out_dir>/<stem><suffix><ext>`, keeping the input's image extension.
///
/// ```
/// use fmri_denoise::nifti_io::derived_path;
/// use std::path::Path;
///
/// let p = derived_path(Path::new("/data/sub-01_bold.nii.gz"), Path::new("/out"), "_res");
/// assert_eq!(p, Path::new("/out/sub-01_bold_res.nii.gz"));
/// ```
pub fn derived_path(in_file: &Path, out_dir: &Path, suffix: &str) -> PathBuf {
    let ext = if in_file.to_string_lossy().ends_with(".nii") {
        ".nii"
    } else {
        ".nii.gz"
    };
    out_dir.join(format!("{}{}{}", image_stem(in_file), suffix, ext))
}
