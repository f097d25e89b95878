//! Delimited-text design matrix loader.
//!
//! One row per scan, one column per regressor. Tab, comma or whitespace
//! delimited; an optional first row of column names is detected when any of
//! its fields is non-numeric. Lines starting with `#` are ignored. Missing
//! values are rejected: a design must be complete.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use nistats_linalg::DenseMatrix;

/// A design matrix with its regressor names.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Regressor names (generated as `x0, x1, ...` when the file has no header).
    pub names: Vec<String>,
    /// Observations x regressors.
    pub matrix: DenseMatrix,
}

impl DesignMatrix {
    pub fn n_scans(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_regressors(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn into_matrix(self) -> DenseMatrix {
        self.matrix
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum Delimiter {
    Tab,
    Comma,
    Whitespace,
}

impl Delimiter {
    fn detect(line: &str) -> Self {
        if line.contains('\t') {
            Delimiter::Tab
        } else if line.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Whitespace
        }
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Tab => line.split('\t').map(|s| s.trim()).collect(),
            Delimiter::Comma => line.split(',').map(|s| s.trim()).collect(),
            Delimiter::Whitespace => line.split_whitespace().collect(),
        }
    }
}

/// Parse a numeric field; missing-value markers are errors.
fn parse_value(s: &str) -> Option<f64> {
    match s {
        "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan" => None,
        _ => s.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Parse design matrix text.
pub fn parse_design_matrix(contents: &str) -> Result<DesignMatrix> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    let (first_num, first) = lines
        .next()
        .ok_or_else(|| anyhow!("Empty design matrix"))?;
    let delim = Delimiter::detect(first);
    let first_fields = delim.split(first);

    let is_header = first_fields.iter().any(|f| f.parse::<f64>().is_err());
    let ncols = first_fields.len();
    let names: Vec<String> = if is_header {
        first_fields.iter().map(|s| s.to_string()).collect()
    } else {
        (0..ncols).map(|j| format!("x{}", j)).collect()
    };

    let mut rows: Vec<Vec<f64>> = Vec::new();
    let data_lines = if is_header {
        None
    } else {
        Some((first_num, first))
    };

    for (line_num, line) in data_lines.into_iter().chain(lines) {
        let fields = delim.split(line);
        if fields.len() != ncols {
            bail!(
                "Line {} has {} fields (expected {})",
                line_num,
                fields.len(),
                ncols
            );
        }
        let row = fields
            .iter()
            .enumerate()
            .map(|(j, f)| {
                parse_value(f).ok_or_else(|| {
                    anyhow!(
                        "Line {}, column '{}': invalid or missing value '{}'",
                        line_num,
                        names[j],
                        f
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }

    if rows.is_empty() {
        bail!("Design matrix has a header but no rows");
    }

    Ok(DesignMatrix {
        names,
        matrix: DenseMatrix::from_rows(&rows),
    })
}

/// Load a design matrix file.
pub fn load_design_matrix(path: &Path) -> Result<DesignMatrix> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read design matrix: {}", path.display()))?;
    let design = parse_design_matrix(&contents)
        .with_context(|| format!("Invalid design matrix: {}", path.display()))?;
    tracing::debug!(
        "Loaded design {} ({} scans x {} regressors)",
        path.display(),
        design.n_scans(),
        design.n_regressors()
    );
    Ok(design)
}

/// Write a design matrix as tab-separated text with a header row.
pub fn save_design_matrix(design: &DesignMatrix, path: &Path) -> Result<()> {
    let mut out = design.names.join("\t");
    out.push('\n');
    for i in 0..design.matrix.nrows() {
        let row: Vec<String> = design.matrix.row(i).iter().map(|v| format!("{}", v)).collect();
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write design matrix: {}", path.display()))?;
    Ok(())
}
