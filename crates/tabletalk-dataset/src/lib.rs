//! Dataset registry for Tabletalk.
//!
//! Loads delimited tabular files into immutable, reference-counted
//! snapshots, infers column types, caches derived statistics, and binds
//! each snapshot to a conversation session.

pub mod error;
pub mod infer;
pub mod loader;
pub mod registry;
pub mod session;
pub mod summary;
pub mod table;

pub use error::DatasetError;
pub use infer::ColumnType;
pub use loader::LoadLimits;
pub use registry::DatasetRegistry;
pub use session::{ExecutionState, HistoryRecord, SessionEntry, SessionSummary};
pub use summary::{ColumnQuality, ColumnSummary, QualityReport};
pub use table::{Column, ColumnSchema, Dataset};
