//! Request lifecycle state machine with validated transitions.
//!
//! Enforces the allowed phase transitions for one in-flight request:
//! Received -> Resolving -> Validating -> Executing -> Streaming -> Completed
//! Resolving/Validating/Executing -> Failed

use std::fmt;

use serde::{Deserialize, Serialize};
use tabletalk_core::SessionId;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::TransitionError;

/// Phase of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Received,
    Resolving,
    Validating,
    Executing,
    Streaming,
    Completed,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestPhase::Completed | RequestPhase::Failed)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestPhase::Received => write!(f, "received"),
            RequestPhase::Resolving => write!(f, "resolving"),
            RequestPhase::Validating => write!(f, "validating"),
            RequestPhase::Executing => write!(f, "executing"),
            RequestPhase::Streaming => write!(f, "streaming"),
            RequestPhase::Completed => write!(f, "completed"),
            RequestPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Validate that a phase transition is allowed.
///
/// Valid transitions:
/// - Received -> Resolving
/// - Resolving -> Validating
/// - Resolving -> Failed
/// - Validating -> Executing
/// - Validating -> Failed
/// - Executing -> Streaming
/// - Executing -> Failed
/// - Streaming -> Completed
pub fn validate_transition(from: RequestPhase, to: RequestPhase) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (RequestPhase::Received, RequestPhase::Resolving)
            | (RequestPhase::Resolving, RequestPhase::Validating)
            | (RequestPhase::Resolving, RequestPhase::Failed)
            | (RequestPhase::Validating, RequestPhase::Executing)
            | (RequestPhase::Validating, RequestPhase::Failed)
            | (RequestPhase::Executing, RequestPhase::Streaming)
            | (RequestPhase::Executing, RequestPhase::Failed)
            | (RequestPhase::Streaming, RequestPhase::Completed)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError(from, to))
    }
}

/// Tracks one request's phase and the path it took.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    request_id: Uuid,
    session_id: SessionId,
    phase: RequestPhase,
    trail: Vec<RequestPhase>,
}

impl RequestTracker {
    pub fn new(request_id: Uuid, session_id: SessionId) -> Self {
        Self {
            request_id,
            session_id,
            phase: RequestPhase::Received,
            trail: vec![RequestPhase::Received],
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn trail(&self) -> &[RequestPhase] {
        &self.trail
    }

    /// Move to `to`. An invalid transition is logged and leaves the phase unchanged.
    pub fn advance(&mut self, to: RequestPhase) -> Result<(), TransitionError> {
        match validate_transition(self.phase, to) {
            Ok(()) => {
                debug!(
                    request_id = %self.request_id,
                    session_id = %self.session_id,
                    from = %self.phase,
                    to = %to,
                    "Request phase transition"
                );
                self.phase = to;
                self.trail.push(to);
                Ok(())
            }
            Err(e) => {
                error!(
                    request_id = %self.request_id,
                    session_id = %self.session_id,
                    error = %e,
                    "Rejected request phase transition"
                );
                Err(e)
            }
        }
    }

    /// Move to `Failed` from whatever non-terminal phase the request is in.
    ///
    /// Received has no direct edge to Failed, so it passes through Resolving.
    pub fn fail(&mut self) {
        if self.phase == RequestPhase::Received {
            let _ = self.advance(RequestPhase::Resolving);
        }
        let _ = self.advance(RequestPhase::Failed);
    }
}
