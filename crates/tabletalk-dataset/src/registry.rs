//! The Dataset Registry.
//!
//! Maps session ids to [`SessionEntry`] slots. The map itself sits behind a
//! briefly-held lock used only for insert, lookup, and eviction; loading
//! and handler execution never hold it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tabletalk_core::config::{DatasetConfig, SessionConfig};
use tabletalk_core::SessionId;
use tracing::{debug, info};

use crate::error::DatasetError;
use crate::loader::{load_source, LoadLimits};
use crate::session::{ExecutionState, SessionEntry, SessionSummary};
use crate::table::Dataset;

// =============================================================================
// DatasetRegistry
// =============================================================================

/// Owns every live session and its active dataset snapshot.
#[derive(Debug)]
pub struct DatasetRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry>>>,
    limits: LoadLimits,
    root_dir: PathBuf,
    history_max_entries: usize,
}

impl DatasetRegistry {
    pub fn new(dataset: &DatasetConfig, session: &SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limits: LoadLimits::from(dataset),
            root_dir: PathBuf::from(&dataset.root_dir),
            history_max_entries: session.history_max_entries,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionEntry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limits(&self) -> &LoadLimits {
        &self.limits
    }

    /// Directory every dataset source must resolve inside.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the entry for `id`, creating an empty one on first use.
    pub fn open(&self, id: &SessionId) -> Arc<SessionEntry> {
        let mut sessions = self.sessions();
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session_id = %id, "Opening session");
            Arc::new(SessionEntry::new(id.clone(), self.history_max_entries))
        }))
    }

    /// The entry for `id`, if the session exists.
    pub fn entry(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions().get(id).cloned()
    }

    /// Load `source` and make it the session's active snapshot.
    ///
    /// Parsing runs on the blocking pool. On failure the session keeps its
    /// previous snapshot and stays usable for a retry.
    pub async fn load(
        &self,
        id: &SessionId,
        source: &str,
    ) -> Result<Arc<Dataset>, DatasetError> {
        let entry = self.open(id);
        self.load_into(&entry, source).await
    }

    /// Load `source` into an entry already held by the caller. Fails with
    /// `SessionClosed` if the entry was closed while loading.
    pub async fn load_into(
        &self,
        entry: &SessionEntry,
        source: &str,
    ) -> Result<Arc<Dataset>, DatasetError> {
        let id = entry.id();
        let root = self.root_dir.clone();
        let label = source.to_string();
        let limits = self.limits;
        let dataset = tokio::task::spawn_blocking(move || load_source(&root, &label, &limits))
            .await
            .map_err(|e| DatasetError::Unreadable(format!("{}: loader task failed: {}", source, e)))??;

        let dataset = Arc::new(dataset);
        entry.replace_dataset(Arc::clone(&dataset))?;
        info!(
            session_id = %id,
            source = %source,
            rows = dataset.row_count(),
            columns = dataset.column_count(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    /// The active snapshot for `id`.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Dataset>, DatasetError> {
        self.entry(id)
            .and_then(|entry| entry.dataset())
            .ok_or_else(|| DatasetError::NotFound(id.clone()))
    }

    /// Atomically swap the session's active snapshot.
    pub fn replace(
        &self,
        id: &SessionId,
        dataset: Arc<Dataset>,
    ) -> Result<Option<Arc<Dataset>>, DatasetError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| DatasetError::NotFound(id.clone()))?;
        let previous = entry.replace_dataset(dataset)?;
        debug!(session_id = %id, "Dataset snapshot replaced");
        Ok(previous)
    }

    /// Remove the session and release its snapshot. Returns whether it existed.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions().remove(id);
        match removed {
            Some(entry) => {
                entry.close();
                info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Sessions idle for at least `timeout` and not currently running.
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions()
            .values()
            .filter(|entry| {
                !entry.is_closed()
                    && entry.execution_state() != ExecutionState::Running
                    && entry.idle_for() >= timeout
            })
            .map(|entry| entry.id().clone())
            .collect()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let entries: Vec<Arc<SessionEntry>> = self.sessions().values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = entries.iter().map(|e| e.summary()).collect();
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        summaries
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
