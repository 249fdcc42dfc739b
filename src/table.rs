//! Confound tables and numeric text files.
//!
//! A [`ConfoundTable`] is `[T, K]` with one name per column. On disk it is
//! tab-separated text with a header row, written with six decimals.
//!
//! Headerless numeric text (motion `.par` files, per-timepoint regressor
//! lists, single-column FD / DVARS outputs) is read with
//! [`read_numeric_text`], which accepts any run of spaces or tabs as the
//! delimiter and skips one leading non-numeric header line.
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{concatenate, Array2, ArrayView1, Axis};

use crate::error::DenoiseError;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfoundTable {
    pub names: Vec<String>,
    /// `[T, K]`
    pub data: Array2<f64>,
}

impl ConfoundTable {
    pub fn new(names: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if names.len() != data.ncols() {
            bail!(
                "confound table has {} names for {} columns",
                names.len(),
                data.ncols()
            );
        }
        Ok(Self { names, data })
    }

    /// A single named column.
    pub fn from_column(name: &str, values: ArrayView1<f64>) -> Self {
        let data = values.to_owned().insert_axis(Axis(1));
        Self {
            names: vec![name.to_string()],
            data,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.data.column(i))
    }

    /// Read a tab-separated table with a header row.
    pub fn read_tsv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => bail!("{} is empty", path.display()),
        };
        let names: Vec<String> = header.split('\t').map(|s| s.trim().to_string()).collect();

        let mut values = Vec::new();
        let mut n_rows = 0;
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(&line, '\t')
                .with_context(|| format!("{}:{}", path.display(), i + 2))?;
            if row.len() != names.len() {
                bail!(
                    "{}:{}: {} fields, header has {}",
                    path.display(),
                    i + 2,
                    row.len(),
                    names.len()
                );
            }
            values.extend(row);
            n_rows += 1;
        }
        let data = Array2::from_shape_vec((n_rows, names.len()), values)?;
        Self::new(names, data)
    }

    /// Write as tab-separated text with a header row. Atomic like image
    /// writes: a temporary file is renamed into place.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(".tsv")
            .tempfile_in(&dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            writeln!(w, "{}", self.names.join("\t"))?;
            for row in self.data.rows() {
                let fields: Vec<String> = row
                    .iter()
                    .map(|v| if v.is_nan() { "n/a".to_string() } else { format!("{v:.6}") })
                    .collect();
                writeln!(w, "{}", fields.join("\t"))?;
            }
            w.flush()?;
        }
        tmp.persist(path)
            .with_context(|| format!("failed to move table into place at {}", path.display()))?;
        tracing::info!(path = %path.display(), rows = self.n_rows(), cols = self.n_cols(), "table written");
        Ok(())
    }
}

/// Concatenate tables column-wise, in order.
///
/// All tables must have the same number of rows; the first table sets the
/// expectation. A mismatch is a [`DenoiseError::ConfoundAlignment`], never
/// truncated or padded.
pub fn hconcat(tables: &[(&str, &ConfoundTable)]) -> Result<ConfoundTable> {
    let Some((_, first)) = tables.first() else {
        bail!("no confound tables to concatenate");
    };
    let expected = first.n_rows();
    for (name, t) in tables {
        if t.n_rows() != expected {
            return Err(DenoiseError::ConfoundAlignment {
                name: name.to_string(),
                rows: t.n_rows(),
                expected,
            }
            .into());
        }
    }
    let names = tables
        .iter()
        .flat_map(|(_, t)| t.names.iter().cloned())
        .collect();
    let views: Vec<_> = tables.iter().map(|(_, t)| t.data.view()).collect();
    let data = concatenate(Axis(1), &views)?;
    ConfoundTable::new(names, data)
}

/// Read whitespace-delimited numeric text as `[rows, cols]`.
///
/// Leading lines that do not parse as numbers are treated as a header and
/// skipped. Blank lines and lines starting with `#` are ignored.
pub fn read_numeric_text(path: &Path) -> Result<Array2<f64>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut values = Vec::new();
    let mut n_cols = None;
    let mut n_rows = 0;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let row = match parse_whitespace_row(trimmed) {
            Ok(row) => row,
            Err(_) if n_rows == 0 && n_cols.is_none() => continue,
            Err(e) => return Err(e.context(format!("{}:{}", path.display(), i + 1))),
        };
        match n_cols {
            None => n_cols = Some(row.len()),
            Some(c) if c != row.len() => bail!(
                "{}:{}: {} fields, expected {}",
                path.display(),
                i + 1,
                row.len(),
                c
            ),
            _ => {}
        }
        values.extend(row);
        n_rows += 1;
    }
    let n_cols = n_cols.unwrap_or(0);
    Ok(Array2::from_shape_vec((n_rows, n_cols), values)?)
}

/// Read a per-timepoint regressor file and return it as `[n_regressors, n_t]`.
///
/// Files may be stored time-major (`[T, n]`) or regressor-major (`[n, T]`);
/// the orientation is detected by matching against `n_t`. Time-major wins
/// when both dimensions equal `n_t`.
pub fn read_timepoint_regressors(path: &Path, n_t: usize) -> Result<Array2<f64>> {
    let raw = read_numeric_text(path)?;
    orient_regressors(raw, n_t)
        .map_err(|e| e.context(format!("per-timepoint regressors {}", path.display())))
}

/// Orient a regressor matrix to `[n_regressors, n_t]`.
pub fn orient_regressors(raw: Array2<f64>, n_t: usize) -> Result<Array2<f64>> {
    let (r, c) = raw.dim();
    if r == n_t {
        Ok(raw.reversed_axes().as_standard_layout().to_owned())
    } else if c == n_t {
        Ok(raw)
    } else {
        Err(DenoiseError::shape("per-timepoint regressors", &[r, n_t], &[r, c]).into())
    }
}

/// Read a single scalar-per-timepoint series (FD, DVARS) as a named table.
pub fn read_scalar_series(path: &Path, name: &str) -> Result<ConfoundTable> {
    let raw = read_numeric_text(path)?;
    if raw.ncols() != 1 {
        return Err(DenoiseError::shape(
            format!("scalar series {}", path.display()),
            &[raw.nrows(), 1],
            &[raw.nrows(), raw.ncols()],
        )
        .into());
    }
    Ok(ConfoundTable::from_column(name, raw.column(0)))
}

fn parse_row(line: &str, sep: char) -> Result<Vec<f64>> {
    line.split(sep).map(parse_field).collect()
}

fn parse_whitespace_row(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace().map(parse_field).collect()
}

fn parse_field(s: &str) -> Result<f64> {
    let s = s.trim();
    match s.to_ascii_lowercase().as_str() {
        "n/a" | "nan" => Ok(f64::NAN),
        _ => s
            .parse::<f64>()
            .with_context(|| format!("not a number: {s:?}")),
    }
}
