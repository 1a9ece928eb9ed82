//! Configuration structures.
//!
//! Configuration is loaded from a JSON file; every section falls back to its
//! defaults when omitted, and a missing file yields the default configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};
use crate::kernel::{ResourceVector, SafetyPolicy};
use crate::validation::{validate_non_empty, validate_positive};

/// Global allocator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Total pool quantity per resource type.
    #[serde(default)]
    pub resources: ResourcesConfig,

    /// Snapshot persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Boot-time restore policies.
    #[serde(default)]
    pub startup: StartupConfig,

    /// Admission policy for unsafe states.
    #[serde(default)]
    pub safety: SafetyPolicy,

    /// Task bookkeeping cleanup.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Check every section; all problems are reported together.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.resources.totals.is_empty() {
            problems.push("resources must declare at least one resource type".to_string());
        }
        for (name, total) in &self.resources.totals {
            if let Err(e) = validate_non_empty(name, "resource name") {
                problems.push(e.to_string());
            }
            if let Err(e) = validate_positive(*total, &format!("resource {}", name)) {
                problems.push(e.to_string());
            }
        }

        let p = &self.persistence;
        if p.save_interval.is_zero() {
            problems.push("persistence save_interval must be positive".to_string());
        }
        if p.check_interval.is_zero() {
            problems.push("persistence check_interval must be positive".to_string());
        }
        if p.history_limit == 0 {
            problems.push("persistence history_limit must be positive".to_string());
        }
        if p.snapshot_history == 0 {
            problems.push("persistence snapshot_history must be positive".to_string());
        }

        if self.cleanup.interval.is_zero() {
            problems.push("cleanup interval must be positive".to_string());
        }

        if let SafetyPolicy::RiskTolerant {
            max_utilization_percent,
            ..
        } = self.safety
        {
            if max_utilization_percent > 100 {
                problems.push("safety max_utilization_percent must be at most 100".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(problems.join("; ")))
        }
    }
}

/// Resource pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcesConfig {
    pub totals: ResourceVector,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        let totals = [("cpu", 100), ("memory", 1000), ("disk", 1000), ("network", 100)]
            .into_iter()
            .map(|(name, total)| (name.to_string(), total))
            .collect();
        Self { totals }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Where the state document is written.
    pub state_file: PathBuf,

    /// Minimum time between automatic saves.
    #[serde(with = "humantime_serde")]
    pub save_interval: Duration,

    /// How often the autosave loop wakes up to check.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Event log capacity (oldest entries dropped first).
    pub history_limit: usize,

    /// Events included in snapshots and persisted documents.
    pub snapshot_history: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("states/current_state.json"),
            save_interval: Duration::from_secs(60),
            check_interval: Duration::from_secs(5),
            history_limit: 1000,
            snapshot_history: 100,
        }
    }
}

/// Boot-time restore policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Use the configured totals instead of the persisted ones on load.
    pub reset_resources: bool,

    /// Start every restored process with zero allocation.
    pub reset_allocations: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            reset_resources: true,
            reset_allocations: true,
        }
    }
}

/// Configuration for task bookkeeping cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// How often to sweep terminal tasks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// How long terminal tasks stay visible.
    #[serde(with = "humantime_serde")]
    pub task_retention: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            task_retention: Duration::from_secs(3600),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
