//! Intent resolution.
//!
//! An [`IntentResolver`] turns free text plus the session's history and the
//! loaded dataset's schema into a structured [`Invocation`]. The dispatcher
//! bounds every call with a timeout and reports any failure to the caller as
//! `UnresolvedIntent`, so resolver errors carry diagnostics for logs only.

pub mod keyword;

pub use keyword::KeywordResolver;

use async_trait::async_trait;
use tabletalk_capability::Invocation;
use tabletalk_dataset::{ColumnSchema, HistoryRecord};

use crate::error::ResolverError;

/// Translates a request into a capability invocation.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    /// Resolve `text` given prior history (oldest first) and the active
    /// dataset's schema, when one is loaded.
    async fn resolve(
        &self,
        history: &[HistoryRecord],
        text: &str,
        schema: Option<&[ColumnSchema]>,
    ) -> Result<Invocation, ResolverError>;
}
