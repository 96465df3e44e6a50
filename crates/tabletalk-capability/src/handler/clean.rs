//! Clean handler.
//!
//! Produces a new snapshot instead of touching the one it was given. The
//! dispatcher swaps the replacement in once the request completes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tabletalk_dataset::infer::parse_number;
use tabletalk_dataset::summary::mean;
use tabletalk_dataset::{Column, ColumnType, Dataset};

use crate::aggregate::format_number;
use crate::error::CapabilityError;
use crate::handler::{require_column, CapabilityHandler, ProgressSink};
use crate::schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult};

const STRATEGIES: [&str; 3] = ["drop_nulls", "fill_mean", "drop_duplicates"];

/// Handler for the `clean` capability.
pub struct CleanHandler;

#[async_trait]
impl CapabilityHandler for CleanHandler {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn description(&self) -> &'static str {
        "Drop rows with nulls, fill numeric nulls with the column mean, or drop duplicate rows"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .arg(
                ArgSpec::optional("strategy", ArgType::choice(&STRATEGIES), "Cleaning strategy")
                    .with_default("drop_nulls"),
            )
            .arg(ArgSpec::optional(
                "columns",
                ArgType::ColumnList,
                "Columns to consider (default: all)",
            ))
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        _progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let strategy = args.str("strategy").unwrap_or("drop_nulls");
        let requested = args.string_list("columns").filter(|c| !c.is_empty());
        let scope: Vec<&Column> = match &requested {
            Some(names) => names
                .iter()
                .map(|n| require_column(&dataset, "columns", n))
                .collect::<Result<_, _>>()?,
            None => dataset.columns().iter().collect(),
        };

        let rows_before = dataset.row_count();
        let (cleaned, filled) = match strategy {
            "drop_nulls" => {
                let cleaned = dataset.filter_rows(dataset.source(), |row| {
                    scope.iter().all(|c| c.values[row].is_some())
                })?;
                (cleaned, 0)
            }
            "drop_duplicates" => {
                let mut seen = HashSet::new();
                let cleaned = dataset.filter_rows(dataset.source(), |row| {
                    let key: Vec<Option<&str>> = scope.iter().map(|c| c.get(row)).collect();
                    seen.insert(key)
                })?;
                (cleaned, 0)
            }
            "fill_mean" => fill_mean(&dataset, &scope)?,
            other => {
                return Err(CapabilityError::invalid(
                    "strategy",
                    format!("'{}' is not one of: {}", other, STRATEGIES.join(", ")),
                ))
            }
        };

        let rows_after = cleaned.row_count();
        let removed = rows_before - rows_after;
        let text = match strategy {
            "fill_mean" => format!("Filled {} null cell(s) with column means", filled),
            _ => format!(
                "Removed {} row(s) with {}; {} row(s) remain",
                removed,
                strategy.replace('_', " "),
                rows_after
            ),
        };
        tracing::info!(strategy, rows_before, rows_after, filled, "Dataset cleaned");

        let details = json!({
            "strategy": strategy,
            "rows_before": rows_before,
            "rows_after": rows_after,
            "rows_removed": removed,
            "cells_filled": filled,
        });
        let result = CapabilityResult::text(text.clone(), details, text);
        if removed == 0 && filled == 0 {
            return Ok(CapabilityOutput::new(result));
        }
        Ok(CapabilityOutput::with_replacement(result, cleaned))
    }
}

/// Replace nulls in numeric columns with the column mean. Non-numeric
/// columns in scope are left as they are.
fn fill_mean(dataset: &Dataset, scope: &[&Column]) -> Result<(Dataset, usize), CapabilityError> {
    let targets: HashSet<&str> = scope
        .iter()
        .filter(|c| dataset.column_type(&c.name) == Some(ColumnType::Numeric))
        .map(|c| c.name.as_str())
        .collect();

    let mut filled = 0;
    let columns = dataset
        .columns()
        .iter()
        .map(|column| {
            if !targets.contains(column.name.as_str()) {
                return column.clone();
            }
            let present: Vec<f64> = column
                .values
                .iter()
                .filter_map(|v| v.as_deref().and_then(parse_number))
                .collect();
            if present.is_empty() {
                return column.clone();
            }
            let fill = format_number(mean(&present));
            let values = column
                .values
                .iter()
                .map(|v| match v {
                    Some(v) => Some(v.clone()),
                    None => {
                        filled += 1;
                        Some(fill.clone())
                    }
                })
                .collect();
            Column::new(column.name.clone(), values)
        })
        .collect();

    let cleaned = dataset.with_columns(dataset.source(), columns)?;
    Ok((cleaned, filled))
}
