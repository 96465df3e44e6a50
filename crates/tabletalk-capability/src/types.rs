//! Invocation and result types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabletalk_dataset::Dataset;

use crate::schema::Arguments;

// =============================================================================
// Invocation
// =============================================================================

/// A structured request produced by intent resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub capability: String,
    #[serde(default)]
    pub arguments: Arguments,
    /// The originating request text, kept for history.
    #[serde(default)]
    pub raw_text: String,
}

impl Invocation {
    pub fn new(capability: impl Into<String>, arguments: Arguments, raw_text: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            arguments,
            raw_text: raw_text.into(),
        }
    }
}

// =============================================================================
// Result payloads
// =============================================================================

/// Rows and columns, cell values as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Row count before any limit was applied.
    pub total_rows: usize,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let total_rows = rows.len();
        Self {
            columns,
            rows,
            total_rows,
        }
    }

    pub fn truncated(&self) -> bool {
        self.total_rows > self.rows.len()
    }

    /// Look up a cell by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Chart kinds a renderer is expected to understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    TimeSeries,
    BarChart,
    PieChart,
    ScatterPlot,
    Heatmap,
    Table,
    Histogram,
    Dashboard,
}

impl ChartKind {
    /// Kinds selectable through the `visualize` capability.
    pub const VISUALIZATIONS: [ChartKind; 7] = [
        ChartKind::TimeSeries,
        ChartKind::BarChart,
        ChartKind::PieChart,
        ChartKind::ScatterPlot,
        ChartKind::Heatmap,
        ChartKind::Table,
        ChartKind::Histogram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::TimeSeries => "time_series",
            ChartKind::BarChart => "bar_chart",
            ChartKind::PieChart => "pie_chart",
            ChartKind::ScatterPlot => "scatter_plot",
            ChartKind::Heatmap => "heatmap",
            ChartKind::Table => "table",
            ChartKind::Histogram => "histogram",
            ChartKind::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChartKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartKind::VISUALIZATIONS
            .iter()
            .chain(std::iter::once(&ChartKind::Dashboard))
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown chart kind: {}", s))
    }
}

/// One data point of a chart series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: Value,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

/// Renderer-neutral chart description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<ChartSeries>,
    /// Tabular payload for `table` charts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TabularResult>,
    /// Component charts of a dashboard.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ChartSpec>,
}

impl ChartSpec {
    pub fn new(kind: ChartKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            x: None,
            y: None,
            series: Vec::new(),
            table: None,
            components: Vec::new(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSummary {
    pub text: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub kind: String,
    pub message: String,
}

// =============================================================================
// CapabilityResult
// =============================================================================

/// What one handler invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityResult {
    Tabular {
        payload: TabularResult,
        explanation: String,
    },
    Chart {
        payload: ChartSpec,
        explanation: String,
    },
    Text {
        payload: TextSummary,
        explanation: String,
    },
    Error {
        payload: ErrorResult,
        explanation: String,
    },
}

impl CapabilityResult {
    pub fn tabular(payload: TabularResult, explanation: impl Into<String>) -> Self {
        CapabilityResult::Tabular {
            payload,
            explanation: explanation.into(),
        }
    }

    pub fn chart(payload: ChartSpec, explanation: impl Into<String>) -> Self {
        CapabilityResult::Chart {
            payload,
            explanation: explanation.into(),
        }
    }

    pub fn text(text: impl Into<String>, details: Value, explanation: impl Into<String>) -> Self {
        CapabilityResult::Text {
            payload: TextSummary {
                text: text.into(),
                details,
            },
            explanation: explanation.into(),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        CapabilityResult::Error {
            payload: ErrorResult {
                kind: kind.into(),
                message: message.clone(),
            },
            explanation: message,
        }
    }

    /// Short tag used in history records.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CapabilityResult::Tabular { .. } => "tabular",
            CapabilityResult::Chart { .. } => "chart",
            CapabilityResult::Text { .. } => "text",
            CapabilityResult::Error { .. } => "error",
        }
    }

    pub fn explanation(&self) -> &str {
        match self {
            CapabilityResult::Tabular { explanation, .. }
            | CapabilityResult::Chart { explanation, .. }
            | CapabilityResult::Text { explanation, .. }
            | CapabilityResult::Error { explanation, .. } => explanation,
        }
    }

    pub fn as_tabular(&self) -> Option<&TabularResult> {
        match self {
            CapabilityResult::Tabular { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn as_chart(&self) -> Option<&ChartSpec> {
        match self {
            CapabilityResult::Chart { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// A handler's result plus an optional replacement snapshot.
///
/// Only the clean family sets `replacement`; the dispatcher swaps it in
/// after the request completes.
#[derive(Debug)]
pub struct CapabilityOutput {
    pub result: CapabilityResult,
    pub replacement: Option<Dataset>,
}

impl CapabilityOutput {
    pub fn new(result: CapabilityResult) -> Self {
        Self {
            result,
            replacement: None,
        }
    }

    pub fn with_replacement(result: CapabilityResult, dataset: Dataset) -> Self {
        Self {
            result,
            replacement: Some(dataset),
        }
    }
}

impl From<CapabilityResult> for CapabilityOutput {
    fn from(result: CapabilityResult) -> Self {
        Self::new(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_result_tagged_serialization() {
        let result = CapabilityResult::tabular(
            TabularResult::new(vec!["a".into()], vec![vec![json!(1)]]),
            "one row",
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["kind"], "tabular");
        assert_eq!(value["payload"]["columns"], json!(["a"]));
        assert_eq!(value["explanation"], "one row");

        let back: CapabilityResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_error_result_uses_message_as_explanation() {
        let result = CapabilityResult::error("NoData", "nothing to plot");
        assert_eq!(result.kind_name(), "error");
        assert_eq!(result.explanation(), "nothing to plot");
    }

    #[test]
    fn test_chart_kind_parse() {
        assert_eq!("heatmap".parse::<ChartKind>().unwrap(), ChartKind::Heatmap);
        assert_eq!("dashboard".parse::<ChartKind>().unwrap(), ChartKind::Dashboard);
        assert!("radar".parse::<ChartKind>().is_err());
        assert_eq!(ChartKind::TimeSeries.to_string(), "time_series");
    }

    #[test]
    fn test_tabular_cell_and_truncation() {
        let mut table = TabularResult::new(
            vec!["k".into(), "v".into()],
            vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]],
        );
        assert_eq!(table.cell(1, "v"), Some(&json!(2)));
        assert!(table.cell(0, "missing").is_none());
        assert!(!table.truncated());
        table.total_rows = 5;
        assert!(table.truncated());
    }

    #[test]
    fn test_invocation_deserializes_without_arguments() {
        let inv: Invocation = serde_json::from_value(json!({"capability": "schema"})).unwrap();
        assert_eq!(inv.capability, "schema");
        assert!(inv.arguments.is_empty());
    }
}
