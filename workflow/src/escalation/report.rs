//! Per-tick results of the escalation sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which step of a sweep failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    ReadStore,
    WriteStore,
    Notify,
    Audit,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadStore => write!(f, "read_store"),
            Self::WriteStore => write!(f, "write_store"),
            Self::Notify => write!(f, "notify"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

/// A caught, logged failure. The sweep continued past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickFailure {
    pub stage: FailureStage,
    /// `None` for failures that concern the whole batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub error: String,
}

/// What one completed sweep saw and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    /// Active incidents examined.
    pub checked: usize,
    pub breaches: Vec<String>,
    pub warnings: Vec<String>,
    /// Incidents this sweep escalated.
    pub escalated: Vec<String>,
    /// Candidates whose guarded write lost to another escalation.
    pub already_escalated: usize,
    /// Candidates that left `open` before the guarded write landed.
    #[serde(default)]
    pub not_eligible: usize,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            checked: 0,
            breaches: Vec::new(),
            warnings: Vec::new(),
            escalated: Vec::new(),
            already_escalated: 0,
            not_eligible: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn fail(
        &mut self,
        stage: FailureStage,
        incident_id: Option<&str>,
        error: impl Into<String>,
    ) {
        self.failures.push(TickFailure {
            stage,
            incident_id: incident_id.map(str::to_string),
            error: error.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "checked {}, {} breach, {} warning, {} escalated, {} already escalated, {} no longer open, {} failures",
            self.checked,
            self.breaches.len(),
            self.warnings.len(),
            self.escalated.len(),
            self.already_escalated,
            self.not_eligible,
            self.failures.len()
        )
    }
}

/// Result of asking the scheduler to sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another sweep was still in flight; this one was dropped.
    Skipped,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }

    pub fn into_report(self) -> Option<TickReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }
}
