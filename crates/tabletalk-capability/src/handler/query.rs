//! Query handler.
//!
//! Filter, project, group, aggregate, sort, and limit in one pass.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tabletalk_dataset::infer::{parse_datetime, parse_number};
use tabletalk_dataset::Dataset;

use crate::aggregate::{cell_value, group_rows, number_value, Aggregate};
use crate::error::CapabilityError;
use crate::handler::{require_column, selected_columns, CapabilityHandler, ProgressSink};
use crate::schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult, TabularResult};

const FILTER_OPS: [&str; 7] = ["eq", "ne", "gt", "gte", "lt", "lte", "contains"];

/// Handler for the `query` capability.
pub struct QueryHandler;

#[async_trait]
impl CapabilityHandler for QueryHandler {
    fn name(&self) -> &'static str {
        "query"
    }

    fn description(&self) -> &'static str {
        "Filter rows, select columns, group and aggregate, then sort and limit the result"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .arg(ArgSpec::optional("columns", ArgType::ColumnList, "Columns to return"))
            .arg(ArgSpec::optional("filter_column", ArgType::Column, "Column to filter on"))
            .arg(
                ArgSpec::optional("filter_op", ArgType::choice(&FILTER_OPS), "Comparison")
                    .with_default("eq"),
            )
            .arg(ArgSpec::optional("filter_value", ArgType::String, "Value to compare against"))
            .arg(ArgSpec::optional("group_by", ArgType::Column, "Column to group by"))
            .arg(
                ArgSpec::optional("aggregate", ArgType::choice(&Aggregate::NAMES), "Aggregate per group")
                    .with_default("count"),
            )
            .arg(ArgSpec::optional("target", ArgType::Column, "Column to aggregate"))
            .arg(ArgSpec::optional("sort_by", ArgType::String, "Result column to sort by"))
            .arg(ArgSpec::optional("descending", ArgType::Boolean, "Sort descending").with_default(false))
            .arg(ArgSpec::optional("limit", ArgType::Integer, "Maximum rows returned").with_default(50))
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        _progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let limit = args.integer("limit").unwrap_or(50);
        if limit <= 0 {
            return Err(CapabilityError::invalid("limit", "must be positive"));
        }

        let rows = filtered_rows(&dataset, args)?;
        let matched = rows.len();
        let mut table = match args.str("group_by") {
            Some(group_by) => grouped(&dataset, args, &rows, group_by)?,
            None => projected(&dataset, args, &rows)?,
        };

        if let Some(sort_by) = args.str("sort_by") {
            let idx = table
                .columns
                .iter()
                .position(|c| c == sort_by)
                .ok_or_else(|| {
                    CapabilityError::invalid(
                        "sort_by",
                        format!("'{}' is not a result column", sort_by),
                    )
                })?;
            let descending = args.boolean("descending").unwrap_or(false);
            table.rows.sort_by(|a, b| {
                let ord = compare_values(&a[idx], &b[idx]);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        table.total_rows = table.rows.len();
        table.rows.truncate(limit as usize);

        let mut explanation = format!("{} of {} rows matched", matched, dataset.row_count());
        if let Some(group_by) = args.str("group_by") {
            explanation.push_str(&format!(", {} group(s) by {}", table.total_rows, group_by));
        }
        if table.truncated() {
            explanation.push_str(&format!(", showing first {}", table.rows.len()));
        }
        Ok(CapabilityResult::tabular(table, explanation).into())
    }
}

fn filtered_rows(dataset: &Dataset, args: &Arguments) -> Result<Vec<usize>, CapabilityError> {
    let all: Vec<usize> = (0..dataset.row_count()).collect();
    let Some(filter_column) = args.str("filter_column") else {
        return Ok(all);
    };
    let column = require_column(dataset, "filter_column", filter_column)?;
    let value = args.str("filter_value").ok_or_else(|| {
        CapabilityError::invalid("filter_value", "required when filter_column is set")
    })?;
    let op = args.str("filter_op").unwrap_or("eq");

    Ok(all
        .into_iter()
        .filter(|row| {
            column
                .get(*row)
                .map(|cell| matches_filter(cell, op, value))
                .unwrap_or(false)
        })
        .collect())
}

fn matches_filter(cell: &str, op: &str, value: &str) -> bool {
    if op == "contains" {
        return cell.to_lowercase().contains(&value.to_lowercase());
    }
    let ord = match (parse_number(cell), parse_number(value)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (parse_datetime(cell), parse_datetime(value)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(cell.to_lowercase().cmp(&value.to_lowercase())),
        },
    };
    let Some(ord) = ord else {
        return false;
    };
    match op {
        "eq" => ord == Ordering::Equal,
        "ne" => ord != Ordering::Equal,
        "gt" => ord == Ordering::Greater,
        "gte" => ord != Ordering::Less,
        "lt" => ord == Ordering::Less,
        "lte" => ord != Ordering::Greater,
        _ => false,
    }
}

fn projected(
    dataset: &Dataset,
    args: &Arguments,
    rows: &[usize],
) -> Result<TabularResult, CapabilityError> {
    let names = selected_columns(dataset, args);
    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let column = require_column(dataset, "columns", name)?;
        let column_type = dataset
            .column_type(name)
            .ok_or_else(|| CapabilityError::Execution(format!("no schema for '{}'", name)))?;
        columns.push((column, column_type));
    }
    let out_rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|(column, column_type)| cell_value(column.get(*row), *column_type))
                .collect()
        })
        .collect();
    Ok(TabularResult::new(names, out_rows))
}

fn grouped(
    dataset: &Dataset,
    args: &Arguments,
    rows: &[usize],
    group_by: &str,
) -> Result<TabularResult, CapabilityError> {
    require_column(dataset, "group_by", group_by)?;
    let aggregate: Aggregate = args
        .str("aggregate")
        .unwrap_or("count")
        .parse()
        .map_err(|e: String| CapabilityError::invalid("aggregate", e))?;
    let target = args.str("target");
    if let Some(target) = target {
        require_column(dataset, "target", target)?;
    } else if aggregate != Aggregate::Count {
        return Err(CapabilityError::invalid(
            "target",
            format!("required for aggregate '{}'", aggregate),
        ));
    }

    let value_column = match target {
        Some(target) => format!("{}_{}", aggregate, target),
        None => "count".to_string(),
    };
    let groups = group_rows(dataset, rows, group_by, target, aggregate);
    let out_rows = groups
        .into_iter()
        .map(|g| vec![json!(g.key), json!(g.rows), number_value(g.value)])
        .collect();
    Ok(TabularResult::new(
        vec![group_by.to_string(), "rows".to_string(), value_column],
        out_rows,
    ))
}

/// Order JSON cells: numbers numerically, strings lexically, nulls last.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}
