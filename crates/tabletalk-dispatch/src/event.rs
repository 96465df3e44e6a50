//! Inbound requests and outbound response events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabletalk_capability::CapabilityResult;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorKind;

/// A free-text request addressed to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub session_id: String,
    /// Required on a session's first request, optional afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_source: Option<String>,
    pub text: String,
}

impl DispatchRequest {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            dataset_source: None,
            text: text.into(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.dataset_source = Some(source.into());
        self
    }
}

/// One event of a request's response stream.
///
/// Zero or more `Partial` events precede exactly one terminal `Final` or
/// `Error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    Partial {
        payload: Value,
    },
    Final {
        result: CapabilityResult,
    },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
}

impl ResponseEvent {
    /// Wire name of the event, matching the serialised `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            ResponseEvent::Partial { .. } => "partial",
            ResponseEvent::Final { .. } => "final",
            ResponseEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseEvent::Partial { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ResponseEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Receiving half of one request's event stream.
///
/// Dropping it cancels the request.
#[derive(Debug)]
pub struct RequestStream {
    pub request_id: Uuid,
    rx: mpsc::Receiver<ResponseEvent>,
}

impl RequestStream {
    pub fn new(request_id: Uuid, rx: mpsc::Receiver<ResponseEvent>) -> Self {
        Self { request_id, rx }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ResponseEvent> {
        self.rx.recv().await
    }

    /// Collect events until the terminal one.
    pub async fn collect(mut self) -> Vec<ResponseEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    pub fn into_inner(self) -> mpsc::Receiver<ResponseEvent> {
        self.rx
    }
}
