//! Immutable dataset snapshots.
//!
//! A [`Dataset`] is column-major: every column holds one optional cell per
//! row, with `None` marking a null. Derived metadata (schema, per-column
//! summaries, quality report) is computed lazily on first access and cached
//! inside the snapshot, so replacing a session's snapshot discards the cache
//! with it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tabletalk_core::Timestamp;
use uuid::Uuid;

use crate::error::DatasetError;
use crate::infer::{infer_column_type, parse_datetime, parse_number, ColumnType};
use crate::summary::{ColumnSummary, QualityReport};

/// A named column of optional string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<String>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&str> {
        self.values.get(row).and_then(|v| v.as_deref())
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Cells parsed as numbers; nulls and unparsable cells become `None`.
    pub fn numbers(&self) -> Vec<Option<f64>> {
        self.values
            .iter()
            .map(|v| v.as_deref().and_then(parse_number))
            .collect()
    }

    /// Distinct non-null values.
    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .filter_map(|v| v.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Schema entry for one column of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub non_null: usize,
    pub nulls: usize,
    pub distinct: usize,
}

/// An immutable loaded table plus lazily derived metadata.
#[derive(Debug)]
pub struct Dataset {
    id: Uuid,
    source: String,
    columns: Vec<Column>,
    row_count: usize,
    loaded_at: Timestamp,
    schema: OnceLock<Vec<ColumnSchema>>,
    summaries: Mutex<HashMap<String, Arc<ColumnSummary>>>,
    quality: OnceLock<QualityReport>,
}

impl Dataset {
    /// Build a snapshot from columns of equal length with unique names.
    pub fn new(source: impl Into<String>, columns: Vec<Column>) -> Result<Self, DatasetError> {
        if columns.is_empty() {
            return Err(DatasetError::Unparsable("dataset has no columns".to_string()));
        }
        let row_count = columns[0].len();
        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != row_count {
                return Err(DatasetError::Unparsable(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.len(),
                    row_count
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(DatasetError::Unparsable(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            source: source.into(),
            columns,
            row_count,
            loaded_at: Timestamp::now(),
            schema: OnceLock::new(),
            summaries: Mutex::new(HashMap::new()),
            quality: OnceLock::new(),
        })
    }

    /// Unique identity of this snapshot.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The source path (or derivation label) this snapshot came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn loaded_at(&self) -> Timestamp {
        self.loaded_at
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// One row as borrowed cells, in column order.
    pub fn row(&self, index: usize) -> Option<Vec<Option<&str>>> {
        if index >= self.row_count {
            return None;
        }
        Some(self.columns.iter().map(|c| c.get(index)).collect())
    }

    /// Column schema with inferred types, computed once per snapshot.
    pub fn schema(&self) -> &[ColumnSchema] {
        self.schema.get_or_init(|| {
            self.columns
                .iter()
                .map(|c| {
                    let nulls = c.null_count();
                    ColumnSchema {
                        name: c.name.clone(),
                        column_type: infer_column_type(&c.values),
                        non_null: c.len() - nulls,
                        nulls,
                        distinct: c.distinct_count(),
                    }
                })
                .collect()
        })
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.schema()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.column_type)
    }

    /// Names of the columns inferred as `column_type`.
    pub fn columns_of_type(&self, column_type: ColumnType) -> Vec<&str> {
        self.schema()
            .iter()
            .filter(|s| s.column_type == column_type)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Summary statistics for one column, cached after first computation.
    pub fn summary(&self, name: &str) -> Option<Arc<ColumnSummary>> {
        let column = self.column(name)?;
        let column_type = self.column_type(name)?;

        if let Some(cached) = self
            .summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(Arc::clone(cached));
        }

        let computed = Arc::new(ColumnSummary::compute(column, column_type));
        let mut cache = self
            .summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&computed));
        Some(Arc::clone(entry))
    }

    /// Null/outlier report, computed once per snapshot.
    pub fn quality(&self) -> &QualityReport {
        self.quality.get_or_init(|| QualityReport::compute(self))
    }

    /// Number of summaries currently cached.
    pub fn cached_summary_count(&self) -> usize {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Derive a new snapshot that keeps only the rows accepted by `keep`.
    pub fn filter_rows(
        &self,
        source: impl Into<String>,
        mut keep: impl FnMut(usize) -> bool,
    ) -> Result<Dataset, DatasetError> {
        let kept: Vec<usize> = (0..self.row_count).filter(|i| keep(*i)).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), kept.iter().map(|i| c.values[*i].clone()).collect()))
            .collect();
        Dataset::new(source, columns)
    }

    /// Derive a new snapshot with replaced columns (same names and order).
    pub fn with_columns(
        &self,
        source: impl Into<String>,
        columns: Vec<Column>,
    ) -> Result<Dataset, DatasetError> {
        Dataset::new(source, columns)
    }

    /// Parsed datetime view of a column, used for ordering time series.
    pub fn datetimes(&self, name: &str) -> Option<Vec<Option<chrono::NaiveDateTime>>> {
        self.column(name).map(|c| {
            c.values
                .iter()
                .map(|v| v.as_deref().and_then(parse_datetime))
                .collect()
        })
    }
}
