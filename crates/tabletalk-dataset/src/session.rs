//! Session entries held by the registry.
//!
//! A [`SessionEntry`] binds a session id to at most one active dataset
//! snapshot, a bounded conversation history, and the execution state of the
//! request currently being served. All fields sit behind short-lived locks;
//! nothing here is held across an await point.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletalk_core::{SessionId, Timestamp};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::DatasetError;
use crate::table::Dataset;

/// Execution state of a session's request pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Idle,
    Running,
    Faulted,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Idle => write!(f, "idle"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Slimmed record of one completed request, kept for follow-up resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub request_id: Uuid,
    pub raw_text: String,
    /// Capability the request resolved to, if resolution succeeded.
    pub capability: Option<String>,
    pub arguments: serde_json::Value,
    /// Terminal outcome: a result kind (`tabular`, `chart`, ...) or `error:<Kind>`.
    pub outcome: String,
    pub explanation: String,
    pub at: Timestamp,
}

impl HistoryRecord {
    pub fn succeeded(&self) -> bool {
        !self.outcome.starts_with("error:")
    }
}

/// API-facing summary of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: String,
    pub last_active_secs_ago: u64,
    pub dataset_source: Option<String>,
    pub rows: Option<usize>,
    pub state: ExecutionState,
    pub history_len: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    dataset: Option<Arc<Dataset>>,
    history: VecDeque<HistoryRecord>,
    execution: ExecutionState,
}

/// One session's slot in the registry.
#[derive(Debug)]
pub struct SessionEntry {
    id: SessionId,
    created_at: Timestamp,
    history_max_entries: usize,
    closed: AtomicBool,
    last_active: Mutex<Instant>,
    state: Mutex<SessionState>,
}

impl SessionEntry {
    pub fn new(id: SessionId, history_max_entries: usize) -> Self {
        Self {
            id,
            created_at: Timestamp::now(),
            history_max_entries,
            closed: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active snapshot, if any. The returned `Arc` keeps the snapshot
    /// alive for the caller even if it is replaced afterwards.
    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.state().dataset.clone()
    }

    /// Atomically swap in a new snapshot, returning the previous one.
    pub fn replace_dataset(
        &self,
        dataset: Arc<Dataset>,
    ) -> Result<Option<Arc<Dataset>>, DatasetError> {
        let mut state = self.state();
        if self.is_closed() {
            return Err(DatasetError::SessionClosed(self.id.clone()));
        }
        Ok(state.dataset.replace(dataset))
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.state().history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Append a record, dropping the oldest ones beyond the configured cap.
    pub fn push_history(&self, record: HistoryRecord) {
        let mut state = self.state();
        state.history.push_back(record);
        while state.history.len() > self.history_max_entries {
            state.history.pop_front();
        }
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.state().execution
    }

    pub fn set_execution_state(&self, execution: ExecutionState) {
        self.state().execution = execution;
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Mark closed and release the snapshot reference.
    pub(crate) fn close(&self) -> Option<Arc<Dataset>> {
        let mut state = self.state();
        self.closed.store(true, Ordering::SeqCst);
        state.execution = ExecutionState::Idle;
        state.dataset.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> SessionSummary {
        let idle = self.idle_for().as_secs();
        let state = self.state();
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at.to_rfc3339(),
            last_active_secs_ago: idle,
            dataset_source: state.dataset.as_ref().map(|d| d.source().to_string()),
            rows: state.dataset.as_ref().map(|d| d.row_count()),
            state: state.execution,
            history_len: state.history.len(),
        }
    }
}
