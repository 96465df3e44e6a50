//! Error types for capability lookup, validation, and execution.

use tabletalk_dataset::DatasetError;

/// Errors from the capability layer.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Invalid argument '{field}': {reason}")]
    InvalidArguments { field: String, reason: String },
    #[error("Capability not registered: {0}")]
    UnknownCapability(String),
    #[error("Capability execution failed: {0}")]
    Execution(String),
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

impl CapabilityError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CapabilityError::InvalidArguments {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The offending argument name, for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            CapabilityError::InvalidArguments { field, .. } => Some(field),
            _ => None,
        }
    }
}
