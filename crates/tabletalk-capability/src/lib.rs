//! Capability contract for Tabletalk.
//!
//! Declares the named operations a session can invoke against its dataset,
//! the argument schema each one accepts, and the result shapes they
//! produce. Built-in handlers cover profiling, cleaning, querying, and
//! chart generation.

pub mod aggregate;
pub mod error;
pub mod handler;
pub mod schema;
pub mod types;

pub use error::CapabilityError;
pub use handler::{CapabilityDescriptor, CapabilityHandler, CapabilityRegistry, ProgressSink};
pub use schema::{ArgSpec, ArgType, Arguments, ArgumentSchema};
pub use types::{
    CapabilityOutput, CapabilityResult, ChartKind, ChartPoint, ChartSeries, ChartSpec,
    ErrorResult, Invocation, TabularResult, TextSummary,
};
