//! Dashboard handler.
//!
//! Plans a handful of metrics from the dataset schema, builds one chart per
//! metric, and emits each component as a partial payload as soon as it is
//! ready. Planning is heuristic:
//!
//! - datetime x numeric: `time_series` of the mean
//! - categorical x numeric: `bar_chart` of the mean
//! - categorical alone: `pie_chart` of counts
//! - numeric alone: `histogram`
//!
//! Candidates are taken round-robin across those families so a small
//! dashboard still mixes chart kinds. Metrics whose columns appear in the
//! optional `focus` text are planned first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tabletalk_dataset::{ColumnType, Dataset};
use tracing::debug;

use crate::aggregate::Aggregate;
use crate::error::CapabilityError;
use crate::handler::visualize::{build_chart, ChartRequest};
use crate::handler::{CapabilityHandler, ProgressSink};
use crate::schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult, ChartKind, ChartSpec};

const COMPONENT_CATEGORIES: usize = 12;

/// A planned dashboard metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMetric {
    pub kind: ChartKind,
    pub x: String,
    pub y: Option<String>,
    pub aggregate: Aggregate,
}

impl PlannedMetric {
    fn mentions(&self, focus: &str) -> bool {
        let focus = focus.to_lowercase();
        focus.contains(&self.x.to_lowercase())
            || self
                .y
                .as_ref()
                .map(|y| focus.contains(&y.to_lowercase()))
                .unwrap_or(false)
    }
}

/// Handler for the `dashboard` capability.
pub struct DashboardHandler;

#[async_trait]
impl CapabilityHandler for DashboardHandler {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn description(&self) -> &'static str {
        "Plan key metrics from the schema and build a multi-chart dashboard"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .arg(ArgSpec::optional("max_metrics", ArgType::Integer, "Maximum charts").with_default(4))
            .arg(ArgSpec::optional("focus", ArgType::String, "Topic to prioritise"))
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let max_metrics = args.integer("max_metrics").unwrap_or(4);
        if max_metrics <= 0 {
            return Err(CapabilityError::invalid("max_metrics", "must be positive"));
        }
        let plan = plan_metrics(&dataset, args.str("focus"), max_metrics as usize);
        let total = plan.len();

        let mut components: Vec<ChartSpec> = Vec::with_capacity(total);
        for metric in &plan {
            let request = ChartRequest {
                kind: metric.kind,
                x: &metric.x,
                y: metric.y.as_deref(),
                aggregate: Some(metric.aggregate),
                limit: COMPONENT_CATEGORIES,
                title: None,
            };
            let chart = match build_chart(&dataset, &request) {
                Ok(chart) if chart.point_count() > 0 => chart,
                Ok(_) => {
                    debug!(kind = %metric.kind, x = %metric.x, "Skipping empty dashboard component");
                    continue;
                }
                Err(e) => {
                    debug!(kind = %metric.kind, x = %metric.x, error = %e, "Skipping dashboard component");
                    continue;
                }
            };

            let partial = json!({
                "component": components.len(),
                "planned": total,
                "chart": chart,
            });
            components.push(chart);
            if !progress.emit(partial).await {
                debug!("Progress receiver closed, finishing dashboard without partials");
            }
            tokio::task::yield_now().await;
        }

        if components.is_empty() {
            return Ok(CapabilityResult::error(
                "EmptyDashboard",
                "No chartable metrics found in the dataset schema",
            )
            .into());
        }

        let mut dashboard = ChartSpec::new(ChartKind::Dashboard, format!("Dashboard for {}", dataset.source()));
        let explanation = format!(
            "Dashboard with {} chart(s): {}",
            components.len(),
            components
                .iter()
                .map(|c| c.title.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );
        dashboard.components = components;
        Ok(CapabilityResult::chart(dashboard, explanation).into())
    }
}

/// Choose up to `max` metrics from the schema.
pub fn plan_metrics(dataset: &Dataset, focus: Option<&str>, max: usize) -> Vec<PlannedMetric> {
    let datetimes = dataset.columns_of_type(ColumnType::Datetime);
    let numerics = dataset.columns_of_type(ColumnType::Numeric);
    let categoricals = dataset.columns_of_type(ColumnType::Categorical);

    let metric = |kind: ChartKind, x: &str, y: Option<&str>, aggregate: Aggregate| PlannedMetric {
        kind,
        x: x.to_string(),
        y: y.map(str::to_string),
        aggregate,
    };

    let mut families: Vec<Vec<PlannedMetric>> = vec![Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    for &d in &datetimes {
        for &n in &numerics {
            families[0].push(metric(ChartKind::TimeSeries, d, Some(n), Aggregate::Mean));
        }
    }
    for &c in &categoricals {
        for &n in &numerics {
            families[1].push(metric(ChartKind::BarChart, c, Some(n), Aggregate::Mean));
        }
        families[2].push(metric(ChartKind::PieChart, c, None, Aggregate::Count));
    }
    for &n in &numerics {
        families[3].push(metric(ChartKind::Histogram, n, None, Aggregate::Count));
    }

    let longest = families.iter().map(Vec::len).max().unwrap_or(0);
    let mut candidates = Vec::new();
    for i in 0..longest {
        for family in &families {
            if let Some(m) = family.get(i) {
                candidates.push(m.clone());
            }
        }
    }

    if let Some(focus) = focus.filter(|f| !f.trim().is_empty()) {
        let (mut focused, rest): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|m| m.mentions(focus));
        focused.extend(rest);
        candidates = focused;
    }

    candidates.truncate(max);
    candidates
}
