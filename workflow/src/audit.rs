//! Audit Log: one structured entry per escalated incident.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Action recorded when the scheduler escalates an incident.
pub const ESCALATION_ACTION: &str = "escalation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub action: String,
    pub target_id: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        target_id: impl Into<String>,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            target_id: target_id.into(),
            detail: detail.into(),
            timestamp,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to append audit entry: {0}")]
    AppendFailed(String),

    #[error("Audit append timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type AuditResult<T> = Result<T, AuditError>;

pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Append-only sink for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> AuditResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    async fn record(&self, _entry: AuditEntry) -> AuditResult<()> {
        Ok(())
    }
}

/// Emits entries as `audit` target log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, entry: AuditEntry) -> AuditResult<()> {
        info!(
            target: "audit",
            id = %entry.id,
            action = %entry.action,
            target_id = %entry.target_id,
            timestamp = %entry.timestamp,
            "{}",
            entry.detail
        );
        Ok(())
    }
}

/// In-memory audit trail. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries targeting `target_id`, oldest first.
    pub fn for_target(&self, target_id: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.target_id == target_id)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }
}
