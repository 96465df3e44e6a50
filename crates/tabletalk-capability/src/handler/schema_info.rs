//! Schema handler.
//!
//! Lists each column with its inferred type and null counts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tabletalk_dataset::Dataset;

use crate::error::CapabilityError;
use crate::handler::{CapabilityHandler, ProgressSink};
use crate::schema::{Arguments, ArgumentSchema};
use crate::types::{CapabilityOutput, CapabilityResult, TabularResult};

/// Handler for the `schema` capability.
pub struct SchemaHandler;

#[async_trait]
impl CapabilityHandler for SchemaHandler {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn description(&self) -> &'static str {
        "List columns with their inferred types, non-null, null, and distinct counts"
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
        let rows = dataset
            .schema()
            .iter()
            .map(|c| {
                vec![
                    json!(c.name),
                    json!(c.column_type.to_string()),
                    json!(c.non_null),
                    json!(c.nulls),
                    json!(c.distinct),
                ]
            })
            .collect();
        let table = TabularResult::new(
            ["column", "type", "non_null", "nulls", "distinct"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows,
        );
        let explanation = format!(
            "{} has {} rows and {} columns",
            dataset.source(),
            dataset.row_count(),
            dataset.column_count()
        );
        Ok(CapabilityResult::tabular(table, explanation).into())
    }
}
