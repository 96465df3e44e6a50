//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use tabletalk_core::TabletalkConfig;
use tabletalk_dispatch::SessionDispatcher;

/// Shared application state.
///
/// Cloned into every handler; the dispatcher is itself a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: SessionDispatcher,
    pub config: Arc<TabletalkConfig>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(dispatcher: SessionDispatcher, config: TabletalkConfig) -> Self {
        Self {
            dispatcher,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}
