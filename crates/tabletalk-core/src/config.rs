use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TabletalkError};

/// Top-level configuration for the Tabletalk service.
///
/// Loaded from `~/.tabletalk/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabletalkConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

impl TabletalkConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TabletalkConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TabletalkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the dispatcher unusable.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.resolution_timeout_ms == 0 {
            return Err(TabletalkError::Config(
                "dispatch.resolution_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.execution_soft_deadline_ms == 0 {
            return Err(TabletalkError::Config(
                "dispatch.execution_soft_deadline_ms must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.event_buffer == 0 {
            return Err(TabletalkError::Config(
                "dispatch.event_buffer must be greater than 0".to_string(),
            ));
        }
        if self.dataset.root_dir.trim().is_empty() {
            return Err(TabletalkError::Config(
                "dataset.root_dir must not be empty".to_string(),
            ));
        }
        if self.session.max_queued_requests == 0 {
            return Err(TabletalkError::Config(
                "session.max_queued_requests must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP transport binds to.
    pub bind_address: String,
    /// HTTP transport port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: 3040,
        }
    }
}

/// Session lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions with no activity for this long are evicted.
    #[serde(alias = "sessionIdleTimeoutSeconds")]
    pub idle_timeout_secs: u64,
    /// Maximum conversation history records kept per session.
    #[serde(alias = "historyMaxEntries")]
    pub history_max_entries: usize,
    /// Maximum requests waiting behind the running one for a session.
    pub max_queued_requests: usize,
    /// How often the idle-eviction sweeper runs.
    pub eviction_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            history_max_entries: 20,
            max_queued_requests: 16,
            eviction_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

/// Request dispatch deadlines and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on the intent resolver wait.
    #[serde(alias = "resolutionTimeoutMs")]
    pub resolution_timeout_ms: u64,
    /// Soft deadline for capability handler execution.
    #[serde(alias = "executionSoftDeadlineMs")]
    pub execution_soft_deadline_ms: u64,
    /// Outbound events buffered per request before the producer waits.
    pub event_buffer: usize,
    /// Maximum request text length in characters.
    pub max_message_length: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            resolution_timeout_ms: 10_000,
            execution_soft_deadline_ms: 30_000,
            event_buffer: 32,
            max_message_length: 2000,
        }
    }
}

impl DispatchConfig {
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    pub fn execution_soft_deadline(&self) -> Duration {
        Duration::from_millis(self.execution_soft_deadline_ms)
    }
}

/// Dataset loading limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory that every dataset source must resolve inside. Relative
    /// sources are taken relative to it.
    pub root_dir: String,
    /// Largest source file accepted, in bytes.
    pub max_bytes: u64,
    /// Largest row count accepted.
    pub max_rows: usize,
    /// Rows included in tabular previews.
    pub preview_rows: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root_dir: "data".to_string(),
            max_bytes: 64 * 1024 * 1024,
            max_rows: 1_000_000,
            preview_rows: 20,
        }
    }
}
