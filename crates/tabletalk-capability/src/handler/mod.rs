//! Capability handler trait and registry.
//!
//! Defines the `CapabilityHandler` async trait and the registry the
//! dispatcher uses to look handlers up by name.

pub mod clean;
pub mod dashboard;
pub mod profile;
pub mod quality;
pub mod query;
pub mod schema_info;
pub mod visualize;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabletalk_dataset::Dataset;
use tokio::sync::mpsc;

use crate::error::CapabilityError;
use crate::schema::{Arguments, ArgumentSchema};
use crate::types::CapabilityOutput;

/// Channel for incremental payloads emitted while a handler runs.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<Value>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit a partial payload. Returns `false` once nobody is listening.
    pub async fn emit(&self, payload: Value) -> bool {
        match &self.tx {
            Some(tx) => tx.send(payload).await.is_ok(),
            None => false,
        }
    }
}

/// A named operation over a dataset snapshot.
///
/// Handlers never mutate the snapshot they receive. The clean family
/// returns a replacement through [`CapabilityOutput::replacement`].
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Unique registry name.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schema(&self) -> ArgumentSchema;

    /// Run against `dataset` with already validated arguments.
    async fn execute(
        &self,
        dataset: Arc<Dataset>,
        args: &Arguments,
        progress: &ProgressSink,
    ) -> Result<CapabilityOutput, CapabilityError>;
}

/// Public description of a registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub arguments: ArgumentSchema,
}

/// Static set of handlers, keyed by name.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<&'static str, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in handler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_defaults();
        registry
    }

    pub fn register_defaults(&mut self) {
        let defaults: Vec<Arc<dyn CapabilityHandler>> = vec![
            Arc::new(schema_info::SchemaHandler),
            Arc::new(profile::ProfileHandler),
            Arc::new(quality::QualityHandler),
            Arc::new(clean::CleanHandler),
            Arc::new(query::QueryHandler),
            Arc::new(visualize::VisualizeHandler),
            Arc::new(dashboard::DashboardHandler),
        ];
        for handler in defaults {
            // Built-in names are distinct; a clash would mean one was already
            // registered by the caller, which keeps precedence.
            if let Err(e) = self.register(handler) {
                tracing::debug!(error = %e, "Skipping built-in capability");
            }
        }
    }

    /// Register a handler. Names must be unique.
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) -> Result<(), CapabilityError> {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            return Err(CapabilityError::DuplicateCapability(name.to_string()));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<CapabilityDescriptor> = self
            .handlers
            .values()
            .map(|h| CapabilityDescriptor {
                name: h.name().to_string(),
                description: h.description().to_string(),
                arguments: h.schema(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Resolve the `columns` argument, defaulting to every column.
pub(crate) fn selected_columns(dataset: &Dataset, args: &Arguments) -> Vec<String> {
    match args.string_list("columns") {
        Some(columns) if !columns.is_empty() => columns,
        _ => dataset.column_names().into_iter().map(str::to_string).collect(),
    }
}

/// Require a column to exist, for handlers run without prior validation.
pub(crate) fn require_column<'a>(
    dataset: &'a Dataset,
    field: &str,
    name: &str,
) -> Result<&'a tabletalk_dataset::Column, CapabilityError> {
    dataset
        .column(name)
        .ok_or_else(|| CapabilityError::invalid(field, format!("unknown column '{}'", name)))
}
