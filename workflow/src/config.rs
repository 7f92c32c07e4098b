//! Engine configuration.
//!
//! Layered as defaults ← TOML file (`[engine]` table) ← environment. Missing
//! keys never fail: they fall back to the documented defaults (24h
//! escalation threshold, 60s tick). Out-of-range values are clamped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Shortest allowed sweep interval.
pub const MIN_TICK_INTERVAL_SECS: u64 = 5;
/// Longest allowed sweep interval.
pub const MAX_TICK_INTERVAL_SECS: u64 = 24 * 3600;
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ESCALATION_THRESHOLD_HOURS: f64 = 24.0;
/// A century. Larger thresholds are clamped to it.
pub const MAX_ESCALATION_THRESHOLD_HOURS: f64 = 100.0 * 365.0 * 24.0;
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 5;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Host-supplied policy for the escalation scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Open incidents older than this are escalated.
    pub escalation_threshold_hours: f64,
    /// Assign escalated, unassigned incidents to `default_assignee`.
    pub auto_assign: bool,
    pub default_assignee: Option<String>,
    /// Seconds between sweeps, clamped to
    /// [`MIN_TICK_INTERVAL_SECS`]..=[`MAX_TICK_INTERVAL_SECS`].
    pub tick_interval_seconds: u64,
    /// Upper bound for each store / notification / audit call in a sweep.
    pub io_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation_threshold_hours: DEFAULT_ESCALATION_THRESHOLD_HOURS,
            auto_assign: false,
            default_assignee: None,
            tick_interval_seconds: DEFAULT_TICK_INTERVAL_SECS,
            io_timeout_seconds: DEFAULT_IO_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    /// Parse a TOML document with an optional `[engine]` table.
    pub fn from_toml_str(raw: &str, origin: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        Ok(file.engine.normalized())
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    /// Apply `SLA_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(hours) = lookup("SLA_ESCALATION_THRESHOLD_HOURS").and_then(|s| s.parse().ok()) {
            self.escalation_threshold_hours = hours;
        }
        if let Some(auto) = lookup("SLA_AUTO_ASSIGN").and_then(|s| parse_bool(&s)) {
            self.auto_assign = auto;
        }
        if let Some(assignee) = lookup("SLA_DEFAULT_ASSIGNEE") {
            self.default_assignee = Some(assignee).filter(|s| !s.trim().is_empty());
        }
        if let Some(secs) = lookup("SLA_TICK_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.tick_interval_seconds = secs;
        }
        if let Some(secs) = lookup("SLA_IO_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.io_timeout_seconds = secs;
        }
        self.normalized()
    }

    /// Clamp values into their sane ranges, warning about each adjustment.
    pub fn normalized(mut self) -> Self {
        if self.tick_interval_seconds < MIN_TICK_INTERVAL_SECS {
            warn!(
                requested = self.tick_interval_seconds,
                floor = MIN_TICK_INTERVAL_SECS,
                "Tick interval below floor, clamping"
            );
            self.tick_interval_seconds = MIN_TICK_INTERVAL_SECS;
        }
        if self.tick_interval_seconds > MAX_TICK_INTERVAL_SECS {
            warn!(
                requested = self.tick_interval_seconds,
                ceiling = MAX_TICK_INTERVAL_SECS,
                "Tick interval above ceiling, clamping"
            );
            self.tick_interval_seconds = MAX_TICK_INTERVAL_SECS;
        }
        if !self.escalation_threshold_hours.is_finite() || self.escalation_threshold_hours < 0.0 {
            warn!(
                requested = self.escalation_threshold_hours,
                "Invalid escalation threshold, using default"
            );
            self.escalation_threshold_hours = DEFAULT_ESCALATION_THRESHOLD_HOURS;
        }
        if self.escalation_threshold_hours > MAX_ESCALATION_THRESHOLD_HOURS {
            warn!(
                requested = self.escalation_threshold_hours,
                ceiling = MAX_ESCALATION_THRESHOLD_HOURS,
                "Escalation threshold above ceiling, clamping"
            );
            self.escalation_threshold_hours = MAX_ESCALATION_THRESHOLD_HOURS;
        }
        if self.io_timeout_seconds == 0 {
            self.io_timeout_seconds = DEFAULT_IO_TIMEOUT_SECS;
        }
        if self
            .default_assignee
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.default_assignee = None;
        }
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(
            self.tick_interval_seconds
                .clamp(MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS),
        )
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds.max(1))
    }

    /// The threshold as a duration, within `[0, MAX_ESCALATION_THRESHOLD_HOURS]`
    /// even when the config was not normalized.
    pub fn escalation_threshold(&self) -> chrono::Duration {
        let hours = if self.escalation_threshold_hours.is_nan() {
            DEFAULT_ESCALATION_THRESHOLD_HOURS
        } else {
            self.escalation_threshold_hours
                .clamp(0.0, MAX_ESCALATION_THRESHOLD_HOURS)
        };
        chrono::Duration::seconds((hours * 3600.0).round() as i64)
    }

    /// Assignee to set on escalation, if auto-assignment is on.
    pub fn auto_assignee(&self) -> Option<&str> {
        if self.auto_assign {
            self.default_assignee.as_deref()
        } else {
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
