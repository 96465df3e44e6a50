//! Data-quality handler.
//!
//! Reports nulls, 1.5 x IQR outliers, and duplicate rows.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tabletalk_dataset::Dataset;

use crate::aggregate::number_value;
use crate::error::CapabilityError;
use crate::handler::{CapabilityHandler, ProgressSink};
use crate::schema::{Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult, TabularResult};

/// Handler for the `quality` capability.
pub struct QualityHandler;

#[async_trait]
impl CapabilityHandler for QualityHandler {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn description(&self) -> &'static str {
        "Null counts, numeric outliers (1.5 x IQR), and duplicate rows"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
    }

    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        _args: &Arguments,
        _progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let report = dataset.quality();
        let rows = report
            .columns
            .iter()
            .map(|c| {
                vec![
                    json!(c.column),
                    json!(c.column_type.to_string()),
                    json!(c.nulls),
                    number_value(Some(c.null_ratio)),
                    json!(c.outliers),
                    number_value(c.lower_fence),
                    number_value(c.upper_fence),
                ]
            })
            .collect();
        let table = TabularResult::new(
            [
                "column",
                "type",
                "nulls",
                "null_ratio",
                "outliers",
                "lower_fence",
                "upper_fence",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rows,
        );
        let explanation = format!(
            "{} null cell(s), {} outlier(s), {} duplicate row(s) across {} rows",
            report.total_nulls(),
            report.total_outliers(),
            report.duplicate_rows,
            report.rows
        );
        Ok(CapabilityResult::tabular(table, explanation).into())
    }
}
