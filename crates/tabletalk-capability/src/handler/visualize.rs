//! Visualize handler.
//!
//! Turns a column selection into a renderer-neutral [`ChartSpec`]. Chart
//! construction lives in [`build_chart`] so the dashboard planner can reuse
//! it per component.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tabletalk_dataset::infer::{parse_datetime, parse_number};
use tabletalk_dataset::{ColumnType, Dataset};

use crate::aggregate::{cell_value, group_rows, histogram, Aggregate};
use crate::error::CapabilityError;
use crate::handler::{require_column, CapabilityHandler, ProgressSink};
use crate::schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
use crate::types::{
    CapabilityOutput, CapabilityResult, ChartKind, ChartPoint, ChartSeries, ChartSpec,
    TabularResult,
};

const HISTOGRAM_BINS: usize = 10;
const MAX_SCATTER_POINTS: usize = 5000;

/// What to chart.
#[derive(Debug, Clone)]
pub struct ChartRequest<'a> {
    pub kind: ChartKind,
    pub x: &'a str,
    pub y: Option<&'a str>,
    pub aggregate: Option<Aggregate>,
    pub limit: usize,
    pub title: Option<String>,
}

/// Handler for the `visualize` capability.
pub struct VisualizeHandler;

#[async_trait]
impl CapabilityHandler for VisualizeHandler {
    fn name(&self) -> &'static str {
        "visualize"
    }

    fn description(&self) -> &'static str {
        "Build a chart: time_series, bar_chart, pie_chart, scatter_plot, heatmap, table, or histogram"
    }

    fn schema(&self) -> ArgumentSchema {
        let kinds: Vec<&str> = ChartKind::VISUALIZATIONS.iter().map(|k| k.as_str()).collect();
        ArgumentSchema::new()
            .arg(
                ArgSpec::optional("chart", ArgType::choice(&kinds), "Chart type")
                    .with_default("bar_chart"),
            )
            .arg(ArgSpec::required("x", ArgType::Column, "Category, time, or x-axis column"))
            .arg(ArgSpec::optional("y", ArgType::Column, "Value or y-axis column"))
            .arg(ArgSpec::optional(
                "aggregate",
                ArgType::choice(&Aggregate::NAMES),
                "Aggregate per category (default: mean with y, count without)",
            ))
            .arg(ArgSpec::optional("limit", ArgType::Integer, "Maximum categories").with_default(20))
            .arg(ArgSpec::optional("title", ArgType::String, "Chart title"))
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        _progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let kind: ChartKind = args
            .str("chart")
            .unwrap_or("bar_chart")
            .parse()
            .map_err(|e: String| CapabilityError::invalid("chart", e))?;
        let x = args
            .str("x")
            .ok_or_else(|| CapabilityError::invalid("x", "required argument missing"))?;
        let aggregate = args
            .str("aggregate")
            .map(|a| a.parse::<Aggregate>())
            .transpose()
            .map_err(|e| CapabilityError::invalid("aggregate", e))?;
        let limit = args.integer("limit").unwrap_or(20);
        if limit <= 0 {
            return Err(CapabilityError::invalid("limit", "must be positive"));
        }

        let request = ChartRequest {
            kind,
            x,
            y: args.str("y"),
            aggregate,
            limit: limit as usize,
            title: args.str("title").map(str::to_string),
        };
        let chart = build_chart(&dataset, &request)?;
        if chart.point_count() == 0 && chart.table.is_none() {
            return Ok(CapabilityResult::error(
                "EmptyChart",
                format!("No plottable values for {} of '{}'", kind, x),
            )
            .into());
        }
        let explanation = format!(
            "{} of {} with {} point(s)",
            kind,
            chart.title,
            chart.point_count()
        );
        Ok(CapabilityResult::chart(chart, explanation).into())
    }
}

/// Build one chart from `dataset`.
pub fn build_chart(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    require_column(dataset, "x", request.x)?;
    if let Some(y) = request.y {
        require_column(dataset, "y", y)?;
    }

    let mut chart = match request.kind {
        ChartKind::BarChart | ChartKind::PieChart => categorical(dataset, request)?,
        ChartKind::TimeSeries => time_series(dataset, request)?,
        ChartKind::ScatterPlot => scatter(dataset, request)?,
        ChartKind::Heatmap => heatmap(dataset, request)?,
        ChartKind::Histogram => histogram_chart(dataset, request)?,
        ChartKind::Table => table(dataset, request),
        ChartKind::Dashboard => {
            return Err(CapabilityError::invalid(
                "chart",
                "dashboards are built by the dashboard capability",
            ))
        }
    };
    if let Some(title) = &request.title {
        chart.title = title.clone();
    }
    Ok(chart)
}

/// Resolve the aggregate and check the value column can feed it.
fn value_aggregate(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<Aggregate, CapabilityError> {
    let aggregate = request.aggregate.unwrap_or(if request.y.is_some() {
        Aggregate::Mean
    } else {
        Aggregate::Count
    });
    match request.y {
        None if aggregate != Aggregate::Count => Err(CapabilityError::invalid(
            "y",
            format!("required for aggregate '{}'", aggregate),
        )),
        Some(y) if aggregate != Aggregate::Count && dataset.column_type(y) != Some(ColumnType::Numeric) => {
            Err(CapabilityError::invalid("y", format!("'{}' is not numeric", y)))
        }
        _ => Ok(aggregate),
    }
}

fn series_name(aggregate: Aggregate, y: Option<&str>) -> String {
    match y {
        Some(y) => format!("{}({})", aggregate, y),
        None => "count".to_string(),
    }
}

fn all_rows(dataset: &Dataset) -> Vec<usize> {
    (0..dataset.row_count()).collect()
}

fn categorical(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    let aggregate = value_aggregate(dataset, request)?;
    let mut groups: Vec<(String, f64)> = group_rows(dataset, &all_rows(dataset), request.x, request.y, aggregate)
        .into_iter()
        .filter_map(|g| g.value.map(|v| (g.key, v)))
        .collect();
    groups.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    groups.truncate(request.limit);

    let name = series_name(aggregate, request.y);
    let mut chart = ChartSpec::new(request.kind, format!("{} by {}", name, request.x));
    chart.x = Some(request.x.to_string());
    chart.y = request.y.map(str::to_string);
    chart.series.push(ChartSeries {
        name,
        points: groups
            .into_iter()
            .map(|(key, value)| ChartPoint {
                x: json!(key),
                y: value,
                label: None,
            })
            .collect(),
    });
    Ok(chart)
}

fn time_series(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    if dataset.column_type(request.x) != Some(ColumnType::Datetime) {
        return Err(CapabilityError::invalid(
            "x",
            format!("'{}' is not a datetime column", request.x),
        ));
    }
    let aggregate = value_aggregate(dataset, request)?;
    let mut points: Vec<(chrono::NaiveDateTime, String, f64)> =
        group_rows(dataset, &all_rows(dataset), request.x, request.y, aggregate)
            .into_iter()
            .filter_map(|g| {
                let when = parse_datetime(&g.key)?;
                Some((when, g.key, g.value?))
            })
            .collect();
    points.sort_by(|a, b| a.0.cmp(&b.0));

    let name = series_name(aggregate, request.y);
    let mut chart = ChartSpec::new(ChartKind::TimeSeries, format!("{} over {}", name, request.x));
    chart.x = Some(request.x.to_string());
    chart.y = request.y.map(str::to_string);
    chart.series.push(ChartSeries {
        name,
        points: points
            .into_iter()
            .map(|(_, key, value)| ChartPoint {
                x: json!(key),
                y: value,
                label: None,
            })
            .collect(),
    });
    Ok(chart)
}

fn scatter(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    let y = request
        .y
        .ok_or_else(|| CapabilityError::invalid("y", "required for scatter_plot"))?;
    let xs = require_column(dataset, "x", request.x)?.numbers();
    let ys = require_column(dataset, "y", y)?.numbers();
    let points: Vec<ChartPoint> = xs
        .into_iter()
        .zip(ys)
        .filter_map(|(x, y)| Some((x?, y?)))
        .take(MAX_SCATTER_POINTS)
        .map(|(x, y)| ChartPoint {
            x: json!(x),
            y,
            label: None,
        })
        .collect();

    let mut chart = ChartSpec::new(ChartKind::ScatterPlot, format!("{} vs {}", y, request.x));
    chart.x = Some(request.x.to_string());
    chart.y = Some(y.to_string());
    chart.series.push(ChartSeries {
        name: y.to_string(),
        points,
    });
    Ok(chart)
}

/// Co-occurrence counts of the most frequent x and y values.
fn heatmap(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    let y_name = request
        .y
        .ok_or_else(|| CapabilityError::invalid("y", "required for heatmap"))?;
    let xs = require_column(dataset, "x", request.x)?;
    let ys = require_column(dataset, "y", y_name)?;

    let top = |column: &tabletalk_dataset::Column| -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for v in column.values.iter().filter_map(|v| v.as_deref()) {
            *counts.entry(v).or_default() += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(request.limit)
            .map(|(v, _)| v.to_string())
            .collect()
    };
    let x_keys = top(xs);
    let y_keys = top(ys);

    let mut cells: HashMap<(&str, &str), usize> = HashMap::new();
    for row in 0..dataset.row_count() {
        if let (Some(x), Some(y)) = (xs.get(row), ys.get(row)) {
            *cells.entry((x, y)).or_default() += 1;
        }
    }

    let mut chart = ChartSpec::new(ChartKind::Heatmap, format!("{} by {}", y_name, request.x));
    chart.x = Some(request.x.to_string());
    chart.y = Some(y_name.to_string());
    chart.series = y_keys
        .iter()
        .map(|y| ChartSeries {
            name: y.clone(),
            points: x_keys
                .iter()
                .map(|x| ChartPoint {
                    x: json!(x),
                    y: cells.get(&(x.as_str(), y.as_str())).copied().unwrap_or(0) as f64,
                    label: None,
                })
                .collect(),
        })
        .collect();
    Ok(chart)
}

fn histogram_chart(dataset: &Dataset, request: &ChartRequest<'_>) -> Result<ChartSpec, CapabilityError> {
    let values: Vec<f64> = require_column(dataset, "x", request.x)?
        .values
        .iter()
        .filter_map(|v| v.as_deref().and_then(parse_number))
        .collect();
    let mut chart = ChartSpec::new(ChartKind::Histogram, format!("Distribution of {}", request.x));
    chart.x = Some(request.x.to_string());
    chart.series.push(ChartSeries {
        name: "count".to_string(),
        points: histogram(&values, HISTOGRAM_BINS)
            .into_iter()
            .map(|(label, count)| ChartPoint {
                x: json!(label),
                y: count as f64,
                label: None,
            })
            .collect(),
    });
    Ok(chart)
}

fn table(dataset: &Dataset, request: &ChartRequest<'_>) -> ChartSpec {
    let names: Vec<&str> = std::iter::once(request.x).chain(request.y).collect();
    let rows: Vec<Vec<Value>> = (0..dataset.row_count())
        .map(|row| {
            names
                .iter()
                .map(|name| {
                    let raw = dataset.column(name).and_then(|c| c.get(row));
                    cell_value(raw, dataset.column_type(name).unwrap_or(ColumnType::Text))
                })
                .collect()
        })
        .collect();
    let mut result = TabularResult::new(names.iter().map(|s| s.to_string()).collect(), rows);
    result.rows.truncate(request.limit);

    let mut chart = ChartSpec::new(ChartKind::Table, names.join(", "));
    chart.x = Some(request.x.to_string());
    chart.y = request.y.map(str::to_string);
    chart.table = Some(result);
    chart
}
