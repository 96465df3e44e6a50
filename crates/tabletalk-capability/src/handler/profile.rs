//! Profile handler.
//!
//! Per-column summary statistics, served from the snapshot's summary cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tabletalk_dataset::Dataset;

use crate::aggregate::number_value;
use crate::error::CapabilityError;
use crate::handler::{require_column, selected_columns, CapabilityHandler, ProgressSink};
use crate::schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult, TabularResult};

const COLUMNS: [&str; 13] = [
    "column", "type", "count", "nulls", "distinct", "min", "max", "mean", "median", "std_dev",
    "earliest", "latest", "top_values",
];

/// Handler for the `profile` capability.
pub struct ProfileHandler;

#[async_trait]
impl CapabilityHandler for ProfileHandler {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn description(&self) -> &'static str {
        "Summary statistics per column: counts, range, mean, median, spread, and frequent values"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().arg(ArgSpec::optional(
            "columns",
            ArgType::ColumnList,
            "Columns to profile (default: all)",
        ))
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        _progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let columns = selected_columns(&dataset, args);
        let mut rows = Vec::with_capacity(columns.len());
        for name in &columns {
            require_column(&dataset, "columns", name)?;
            let summary = dataset
                .summary(name)
                .ok_or_else(|| CapabilityError::Execution(format!("no summary for '{}'", name)))?;
            let top: Vec<Value> = summary
                .top_values
                .iter()
                .map(|(value, count)| json!({"value": value, "count": count}))
                .collect();
            rows.push(vec![
                json!(summary.column),
                json!(summary.column_type.to_string()),
                json!(summary.count),
                json!(summary.nulls),
                json!(summary.distinct),
                number_value(summary.min),
                number_value(summary.max),
                number_value(summary.mean),
                number_value(summary.median),
                number_value(summary.std_dev),
                json!(summary.earliest),
                json!(summary.latest),
                Value::Array(top),
            ]);
        }

        let explanation = format!(
            "Profiled {} column(s) over {} rows",
            rows.len(),
            dataset.row_count()
        );
        let table = TabularResult::new(COLUMNS.iter().map(|s| s.to_string()).collect(), rows);
        Ok(CapabilityResult::tabular(table, explanation).into())
    }
}
