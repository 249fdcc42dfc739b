//! Per-run confound table assembly.
//!
//! Sources are concatenated column-wise in a fixed order:
//!
//! ```text
//! extended motion | framewise displacement | aCompCor | DVARS
//! ```
//!
//! Missing optional sources are skipped. Every source must have the same
//! number of rows.
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::table::{hconcat, read_scalar_series, ConfoundTable};

pub const ALL_CONFOUNDS_FILE: &str = "all_confounds.tsv";
pub const FD_COLUMN: &str = "framewise_displacement";
pub const DVARS_COLUMN: &str = "dvars";

/// Confound sources for one run.
#[derive(Debug, Clone, Copy)]
pub struct ConfoundSources<'a> {
    pub motion: &'a ConfoundTable,
    pub fd: Option<&'a ConfoundTable>,
    pub compcor: Option<&'a ConfoundTable>,
    pub dvars: Option<&'a ConfoundTable>,
}

/// Concatenate the sources in fixed order.
///
/// A row-count mismatch is a
/// [`DenoiseError::ConfoundAlignment`](crate::DenoiseError) naming the
/// offending source.
pub fn concat_confounds(sources: &ConfoundSources<'_>) -> Result<ConfoundTable> {
    let mut tables = vec![("motion", sources.motion)];
    if let Some(t) = sources.fd {
        tables.push(("framewise displacement", t));
    }
    if let Some(t) = sources.compcor {
        tables.push(("acompcor", t));
    }
    if let Some(t) = sources.dvars {
        tables.push(("dvars", t));
    }
    hconcat(&tables)
}

/// File paths of the confound sources for one run.
#[derive(Debug, Clone, Default)]
pub struct ConfoundFiles {
    /// Extended motion table (TSV with header).
    pub motion: PathBuf,
    /// Single-column numeric text.
    pub fd: Option<PathBuf>,
    /// aCompCor table (TSV with header).
    pub compcor: Option<PathBuf>,
    /// Single-column numeric text.
    pub dvars: Option<PathBuf>,
}

/// Read, concatenate and write [`ALL_CONFOUNDS_FILE`] into `out_dir`.
pub fn concat_confound_files(files: &ConfoundFiles, out_dir: &Path) -> Result<(ConfoundTable, PathBuf)> {
    let motion = ConfoundTable::read_tsv(&files.motion)?;
    let fd = files
        .fd
        .as_deref()
        .map(|p| read_scalar_series(p, FD_COLUMN))
        .transpose()?;
    let compcor = files.compcor.as_deref().map(ConfoundTable::read_tsv).transpose()?;
    let dvars = files
        .dvars
        .as_deref()
        .map(|p| read_scalar_series(p, DVARS_COLUMN))
        .transpose()?;

    let table = concat_confounds(&ConfoundSources {
        motion: &motion,
        fd: fd.as_ref(),
        compcor: compcor.as_ref(),
        dvars: dvars.as_ref(),
    })?;
    let out = out_dir.join(ALL_CONFOUNDS_FILE);
    table.write_tsv(&out)?;
    info!(rows = table.n_rows(), cols = table.n_cols(), "confounds assembled");
    Ok((table, out))
}
