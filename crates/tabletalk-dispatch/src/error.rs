//! Error types for request dispatch.

use std::fmt;

use serde::{Deserialize, Serialize};
use tabletalk_capability::CapabilityError;
use tabletalk_core::SessionId;
use uuid::Uuid;

use crate::event::ResponseEvent;
use crate::state_machine::RequestPhase;

/// Caller-facing error kinds, serialised with their exact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    LoadError,
    UnresolvedIntent,
    ResolutionTimeout,
    UnknownCapability,
    InvalidArguments,
    HandlerExecutionError,
    ExecutionTimeout,
    DatasetNotLoaded,
    SessionClosed,
    InvalidRequest,
    SessionBusy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LoadError => "LoadError",
            ErrorKind::UnresolvedIntent => "UnresolvedIntent",
            ErrorKind::ResolutionTimeout => "ResolutionTimeout",
            ErrorKind::UnknownCapability => "UnknownCapability",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::HandlerExecutionError => "HandlerExecutionError",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::DatasetNotLoaded => "DatasetNotLoaded",
            ErrorKind::SessionClosed => "SessionClosed",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::SessionBusy => "SessionBusy",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a request. Each becomes exactly one terminal error event.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("could not load dataset: {0}")]
    Load(String),
    #[error("could not understand the request; please rephrase it")]
    UnresolvedIntent,
    #[error("understanding the request took longer than {0} ms; please try again")]
    ResolutionTimeout(u64),
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("invalid argument '{field}': {reason}")]
    InvalidArguments { field: String, reason: String },
    #[error("the request failed inside the '{capability}' capability (reference {reference})")]
    HandlerExecution { capability: String, reference: Uuid },
    #[error("execution exceeded the {0} ms deadline")]
    ExecutionTimeout(u64),
    #[error("no dataset is loaded for this session; supply a datasetSource first")]
    DatasetNotLoaded,
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session {0} has too many queued requests")]
    SessionBusy(SessionId),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Load(_) => ErrorKind::LoadError,
            DispatchError::UnresolvedIntent => ErrorKind::UnresolvedIntent,
            DispatchError::ResolutionTimeout(_) => ErrorKind::ResolutionTimeout,
            DispatchError::UnknownCapability(_) => ErrorKind::UnknownCapability,
            DispatchError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            DispatchError::HandlerExecution { .. } => ErrorKind::HandlerExecutionError,
            DispatchError::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            DispatchError::DatasetNotLoaded => ErrorKind::DatasetNotLoaded,
            DispatchError::SessionClosed(_) => ErrorKind::SessionClosed,
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::SessionBusy(_) => ErrorKind::SessionBusy,
        }
    }

    /// Convert into the terminal error event sent to the caller.
    pub fn to_event(&self) -> ResponseEvent {
        let (field, reference) = match self {
            DispatchError::InvalidArguments { field, .. } => (Some(field.clone()), None),
            DispatchError::HandlerExecution { reference, .. } => (None, Some(reference.to_string())),
            _ => (None, None),
        };
        ResponseEvent::Error {
            kind: self.kind(),
            message: self.to_string(),
            field,
            reference,
        }
    }

    /// Map a capability-layer validation failure.
    pub fn from_validation(err: CapabilityError) -> Self {
        match err {
            CapabilityError::InvalidArguments { field, reason } => {
                DispatchError::InvalidArguments { field, reason }
            }
            CapabilityError::UnknownCapability(name) => DispatchError::UnknownCapability(name),
            other => DispatchError::InvalidArguments {
                field: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Failures reported by an intent resolver. Never shown to callers verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
    #[error("resolver returned a malformed invocation: {0}")]
    Malformed(String),
    #[error("no capability matched the request")]
    NoMatch,
}

/// A request phase change the state machine does not allow.
#[derive(Debug, thiserror::Error)]
#[error("Invalid request phase transition: {0} -> {1}")]
pub struct TransitionError(pub RequestPhase, pub RequestPhase);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_exact_names() {
        assert_eq!(
            serde_json::to_value(ErrorKind::HandlerExecutionError).unwrap(),
            "HandlerExecutionError"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::ResolutionTimeout).unwrap(),
            "ResolutionTimeout"
        );
        assert_eq!(ErrorKind::SessionClosed.to_string(), "SessionClosed");
    }

    #[test]
    fn test_dispatch_error_kinds() {
        assert_eq!(DispatchError::Load("x".into()).kind(), ErrorKind::LoadError);
        assert_eq!(DispatchError::UnresolvedIntent.kind(), ErrorKind::UnresolvedIntent);
        assert_eq!(DispatchError::DatasetNotLoaded.kind(), ErrorKind::DatasetNotLoaded);
        assert_eq!(
            DispatchError::SessionBusy(SessionId::from("S1")).kind(),
            ErrorKind::SessionBusy
        );
    }

    #[test]
    fn test_invalid_arguments_event_names_field() {
        let err = DispatchError::InvalidArguments {
            field: "limit".into(),
            reason: "expected integer".into(),
        };
        match err.to_event() {
            ResponseEvent::Error {
                kind,
                field,
                reference,
                message,
            } => {
                assert_eq!(kind, ErrorKind::InvalidArguments);
                assert_eq!(field.as_deref(), Some("limit"));
                assert!(reference.is_none());
                assert_eq!(message, "invalid argument 'limit': expected integer");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_handler_error_event_carries_only_reference() {
        let reference = Uuid::new_v4();
        let err = DispatchError::HandlerExecution {
            capability: "profile".into(),
            reference,
        };
        match err.to_event() {
            ResponseEvent::Error {
                kind,
                reference: got,
                message,
                ..
            } => {
                assert_eq!(kind, ErrorKind::HandlerExecutionError);
                assert_eq!(got, Some(reference.to_string()));
                assert!(message.contains(&reference.to_string()));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_from_validation_maps_kinds() {
        let err = DispatchError::from_validation(CapabilityError::invalid("x", "missing"));
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        let err =
            DispatchError::from_validation(CapabilityError::UnknownCapability("forecast".into()));
        assert_eq!(err.kind(), ErrorKind::UnknownCapability);
    }

    #[test]
    fn test_resolver_error_display() {
        assert_eq!(
            ResolverError::NoMatch.to_string(),
            "no capability matched the request"
        );
        let err = TransitionError(RequestPhase::Completed, RequestPhase::Executing);
        assert_eq!(
            err.to_string(),
            "Invalid request phase transition: completed -> executing"
        );
    }
}
