//! Route handler functions for all API endpoints.
//!
//! Request submission streams its response events as SSE; the remaining
//! endpoints return JSON.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tabletalk_capability::CapabilityDescriptor;
use tabletalk_core::SessionId;
use tabletalk_dataset::{HistoryRecord, SessionSummary};
use tabletalk_dispatch::{DispatchRequest, ResponseEvent};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

/// Body of `POST /sessions/{id}/requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(default)]
    pub dataset_source: Option<String>,
    pub text: String,
}

/// Response for GET /sessions.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

/// Response for GET /sessions/{id}/history.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<HistoryRecord>,
}

/// Response for DELETE /sessions/{id}.
#[derive(Debug, Serialize, Deserialize)]
pub struct CloseResponse {
    pub session_id: String,
    pub closed: bool,
}

/// Response for GET /capabilities.
#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Response for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub capabilities: usize,
}

// =============================================================================
// Handler functions
// =============================================================================

/// POST /sessions/{id}/requests - submit a request and stream its events.
///
/// Each SSE event is named after the response event's `type` and carries the
/// event as JSON. The stream ends after the terminal event. Disconnecting
/// cancels the request.
pub async fn submit_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let Json(body) = body?;
    if state.dispatcher.is_shut_down() {
        return Err(ApiError::ServiceUnavailable(
            "The server is shutting down".to_string(),
        ));
    }

    let request = DispatchRequest {
        session_id: id,
        dataset_source: body.dataset_source,
        text: body.text,
    };
    let stream = state.dispatcher.submit(request);
    tracing::debug!(request_id = %stream.request_id, "Streaming request events");

    let events = ReceiverStream::new(stream.into_inner())
        .map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_sse(event: &ResponseEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.event_type()).data(data)
}

/// GET /sessions - summaries of every open session.
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let mut sessions = state.dispatcher.sessions();
    sessions.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    let total = sessions.len();
    Json(SessionsResponse { sessions, total })
}

/// GET /sessions/{id}/history - the session's retained request history.
pub async fn session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state
        .dispatcher
        .history(&SessionId::new(id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("Session '{}' not found", id)))?;
    Ok(Json(HistoryResponse {
        session_id: id,
        history,
    }))
}

/// DELETE /sessions/{id} - close a session and release its dataset.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CloseResponse>, ApiError> {
    if !state.dispatcher.close(&SessionId::new(id.as_str())) {
        return Err(ApiError::NotFound(format!("Session '{}' not found", id)));
    }
    tracing::info!(session_id = %id, "Session closed via API");
    Ok(Json(CloseResponse {
        session_id: id,
        closed: true,
    }))
}

/// GET /capabilities - descriptors of every registered capability.
pub async fn list_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: state.dispatcher.capabilities().descriptors(),
    })
}

/// GET /health - liveness and basic counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.dispatcher.is_shut_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.dispatcher.registry().len(),
        capabilities: state.dispatcher.capabilities().len(),
    })
}
