//! Delimited-text loading.
//!
//! Reads a CSV/TSV file into a [`Dataset`]. The first record is the header;
//! empty or repeated header names are made unique, null tokens become
//! `None`, and ragged rows reject the whole source.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tabletalk_core::config::DatasetConfig;

use crate::error::DatasetError;
use crate::infer::is_null_token;
use crate::table::{Column, Dataset};

/// Size bounds applied while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub max_bytes: u64,
    pub max_rows: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        LoadLimits::from(&DatasetConfig::default())
    }
}

impl From<&DatasetConfig> for LoadLimits {
    fn from(config: &DatasetConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_rows: config.max_rows,
        }
    }
}

/// Resolve a caller-supplied source to a file inside `root`.
///
/// Relative sources are joined to `root`. Both sides are canonicalised, so
/// `..` segments and symlinks cannot leave the root. Every rejection carries
/// the same message, which does not reveal whether the file exists.
pub fn resolve_source(root: &Path, source: &str) -> Result<PathBuf, DatasetError> {
    let unavailable = || DatasetError::Unreadable(format!("{}: source is not available", source));
    let root = root.canonicalize().map_err(|e| {
        tracing::warn!(root = %root.display(), error = %e, "Dataset root is not accessible");
        unavailable()
    })?;
    let candidate = Path::new(source);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = joined.canonicalize().map_err(|e| {
        tracing::debug!(source = %source, error = %e, "Dataset source did not resolve");
        unavailable()
    })?;
    if !resolved.starts_with(&root) {
        tracing::warn!(source = %source, "Dataset source outside the dataset root");
        return Err(unavailable());
    }
    Ok(resolved)
}

/// Load a caller-supplied source confined to `root`. The dataset and any
/// error are labelled with `source` as given, never the resolved path.
pub fn load_source(root: &Path, source: &str, limits: &LoadLimits) -> Result<Dataset, DatasetError> {
    let path = resolve_source(root, source)?;
    load_file(&path, source, limits)
}

fn load_file(path: &Path, label: &str, limits: &LoadLimits) -> Result<Dataset, DatasetError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DatasetError::Unreadable(format!("{}: {}", label, e)))?;
    if !metadata.is_file() {
        return Err(DatasetError::Unreadable(format!("{}: not a regular file", label)));
    }
    if metadata.len() > limits.max_bytes {
        return Err(DatasetError::TooLarge(format!(
            "{} is {} bytes, limit is {}",
            label,
            metadata.len(),
            limits.max_bytes
        )));
    }

    let bytes = std::fs::read(path)
        .map_err(|e| DatasetError::Unreadable(format!("{}: {}", label, e)))?;
    let delimiter = sniff_delimiter(path, &bytes);
    tracing::debug!(
        path = %path.display(),
        bytes = bytes.len(),
        delimiter = %(delimiter as char).escape_default(),
        "Parsing dataset source"
    );
    parse_delimited(&bytes, delimiter, label, limits)
}

/// Parse delimited bytes into a dataset labelled with `source`.
pub fn parse_delimited(
    bytes: &[u8],
    delimiter: u8,
    source: &str,
    limits: &LoadLimits,
) -> Result<Dataset, DatasetError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| DatasetError::Unparsable(format!("{}: {}", source, e)))?
        .clone();
    if headers.is_empty() {
        return Err(DatasetError::Unparsable(format!("{}: missing header row", source)));
    }

    let names = unique_headers(headers.iter());
    let mut values: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Unparsable(format!("{}: {}", source, e)))?;
        rows += 1;
        if rows > limits.max_rows {
            return Err(DatasetError::TooLarge(format!(
                "{} has more than {} rows",
                source, limits.max_rows
            )));
        }
        for (idx, cell) in record.iter().enumerate() {
            let cell = if is_null_token(cell) {
                None
            } else {
                Some(cell.trim().to_string())
            };
            values[idx].push(cell);
        }
    }

    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, cells)| Column::new(name, cells))
        .collect();
    Dataset::new(source, columns)
}

/// Pick the delimiter from the file extension and header line.
fn sniff_delimiter(path: &Path, bytes: &[u8]) -> u8 {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if ext.as_deref() == Some("tsv") {
        return b'\t';
    }
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.enumerate()
        .map(|(idx, name)| {
            let base = match name.trim() {
                "" => format!("column_{}", idx + 1),
                trimmed => trimmed.to_string(),
            };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}
