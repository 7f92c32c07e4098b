//! Record Store: the host's incident and change records.
//!
//! The engine never owns records; it reads and mutates them through
//! [`RecordStore`]. The escalation write is a guarded compare-and-set so
//! several scheduler instances can share one store without double-firing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::model::{Change, ChangePatch, Incident, IncidentPatch, IncidentStatus};

/// Error type for record store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a record store
pub type SharedRecordStore = Arc<dyn RecordStore>;

/// Outcome of the guarded escalation write.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationWrite {
    /// This caller flipped `escalated` to true; carries the stored record.
    Applied(Incident),
    /// Someone else already escalated the incident; nothing was written.
    AlreadyEscalated,
    /// The incident left `open` since it was read; nothing was written.
    NotEligible(IncidentStatus),
}

/// Read/write access to incident and change records.
///
/// Implementations must give read-your-writes within a process.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Incidents whose status is neither resolved nor closed.
    async fn list_active_incidents(&self) -> StoreResult<Vec<Incident>>;

    async fn get_incident(&self, id: &str) -> StoreResult<Incident>;

    /// Apply a partial update and return the stored record.
    async fn update_incident(&self, id: &str, patch: IncidentPatch) -> StoreResult<Incident>;

    /// Set `escalated`/`escalated_at` only if the incident is still `open`
    /// and not yet escalated. `assignee` is written only when the incident
    /// has none.
    ///
    /// Must be atomic with respect to other callers of this method.
    async fn escalate_incident(
        &self,
        id: &str,
        escalated_at: DateTime<Utc>,
        assignee: Option<&str>,
    ) -> StoreResult<EscalationWrite>;

    async fn list_changes(&self) -> StoreResult<Vec<Change>>;

    async fn get_change(&self, id: &str) -> StoreResult<Change>;

    async fn update_change(&self, id: &str, patch: ChangePatch) -> StoreResult<Change>;
}

/// Apply the guarded escalation to a record in place.
///
/// Shared by every store implementation so the compare-and-set rule lives
/// in one spot.
pub fn apply_escalation(
    incident: &mut Incident,
    escalated_at: DateTime<Utc>,
    assignee: Option<&str>,
) -> EscalationWrite {
    if incident.escalated {
        return EscalationWrite::AlreadyEscalated;
    }
    if incident.status != IncidentStatus::Open {
        return EscalationWrite::NotEligible(incident.status);
    }
    incident.escalated = true;
    incident.escalated_at = Some(escalated_at);
    if incident.assignee.is_none() {
        if let Some(assignee) = assignee {
            incident.assignee = Some(assignee.to_string());
        }
    }
    EscalationWrite::Applied(incident.clone())
}

#[derive(Debug, Default)]
struct Records {
    incidents: BTreeMap<String, Incident>,
    changes: BTreeMap<String, Change>,
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(
        incidents: impl IntoIterator<Item = Incident>,
        changes: impl IntoIterator<Item = Change>,
    ) -> Self {
        let records = Records {
            incidents: incidents.into_iter().map(|i| (i.id.clone(), i)).collect(),
            changes: changes.into_iter().map(|c| (c.id.clone(), c)).collect(),
        };
        Self {
            records: RwLock::new(records),
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Insert or replace an incident.
    pub fn insert_incident(&self, incident: Incident) -> StoreResult<()> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.incidents.insert(incident.id.clone(), incident);
        Ok(())
    }

    /// Insert or replace a change.
    pub fn insert_change(&self, change: Change) -> StoreResult<()> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.changes.insert(change.id.clone(), change);
        Ok(())
    }

    /// Every incident, including resolved and closed ones.
    pub fn all_incidents(&self) -> StoreResult<Vec<Incident>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.incidents.values().cloned().collect())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn list_active_incidents(&self) -> StoreResult<Vec<Incident>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records
            .incidents
            .values()
            .filter(|i| i.is_active())
            .cloned()
            .collect())
    }

    async fn get_incident(&self, id: &str) -> StoreResult<Incident> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        records
            .incidents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_incident(&self, id: &str, patch: IncidentPatch) -> StoreResult<Incident> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let incident = records
            .incidents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(incident);
        Ok(incident.clone())
    }

    async fn escalate_incident(
        &self,
        id: &str,
        escalated_at: DateTime<Utc>,
        assignee: Option<&str>,
    ) -> StoreResult<EscalationWrite> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let incident = records
            .incidents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(apply_escalation(incident, escalated_at, assignee))
    }

    async fn list_changes(&self) -> StoreResult<Vec<Change>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.changes.values().cloned().collect())
    }

    async fn get_change(&self, id: &str) -> StoreResult<Change> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        records
            .changes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_change(&self, id: &str, patch: ChangePatch) -> StoreResult<Change> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let change = records
            .changes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(change);
        Ok(change.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeStatus, Priority};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn store() -> InMemoryStore {
        InMemoryStore::with_records(
            [
                Incident::new("INC-1", Priority::High, t0()),
                Incident::new("INC-2", Priority::Low, t0()).with_status(IncidentStatus::Closed),
                Incident::new("INC-3", Priority::Medium, t0()).with_assignee("bob"),
            ],
            [Change::new("CHG-1", "normal")],
        )
    }

    #[tokio::test]
    async fn test_list_active_skips_closed() {
        let ids: Vec<_> = store()
            .list_active_incidents()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, ["INC-1", "INC-3"]);
    }

    #[tokio::test]
    async fn test_update_is_read_back() {
        let store = store();
        store
            .update_incident("INC-1", IncidentPatch::status(IncidentStatus::Resolved))
            .await
            .unwrap();
        assert_eq!(
            store.get_incident("INC-1").await.unwrap().status,
            IncidentStatus::Resolved
        );
        assert_eq!(store.list_active_incidents().await.unwrap().len(), 1);

        let change = store
            .update_change("CHG-1", ChangePatch::status(ChangeStatus::Pending))
            .await
            .unwrap();
        assert_eq!(change.status, ChangeStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = store();
        assert!(matches!(
            store.get_incident("INC-404").await,
            Err(StoreError::NotFound(id)) if id == "INC-404"
        ));
        assert!(matches!(
            store.escalate_incident("INC-404", t0(), None).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_change("CHG-404", ChangePatch::default()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_escalation_is_compare_and_set() {
        let store = store();
        let first = store
            .escalate_incident("INC-1", t0(), Some("oncall"))
            .await
            .unwrap();
        let EscalationWrite::Applied(incident) = first else {
            panic!("first escalation should apply");
        };
        assert!(incident.escalated);
        assert_eq!(incident.escalated_at, Some(t0()));
        assert_eq!(incident.assignee.as_deref(), Some("oncall"));

        let second = store
            .escalate_incident("INC-1", t0() + chrono::Duration::hours(1), Some("other"))
            .await
            .unwrap();
        assert_eq!(second, EscalationWrite::AlreadyEscalated);

        let stored = store.get_incident("INC-1").await.unwrap();
        assert_eq!(stored.escalated_at, Some(t0()));
        assert_eq!(stored.assignee.as_deref(), Some("oncall"));
    }

    #[tokio::test]
    async fn test_escalation_keeps_existing_assignee() {
        let store = store();
        store
            .escalate_incident("INC-3", t0(), Some("oncall"))
            .await
            .unwrap();
        let stored = store.get_incident("INC-3").await.unwrap();
        assert!(stored.escalated);
        assert_eq!(stored.assignee.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_escalation_requires_open_status() {
        let store = store();
        store
            .update_incident("INC-1", IncidentPatch::status(IncidentStatus::InProgress))
            .await
            .unwrap();

        let write = store.escalate_incident("INC-1", t0(), Some("oncall")).await.unwrap();
        assert_eq!(write, EscalationWrite::NotEligible(IncidentStatus::InProgress));

        let stored = store.get_incident("INC-1").await.unwrap();
        assert!(!stored.escalated);
        assert!(stored.escalated_at.is_none());
        assert!(stored.assignee.is_none());
    }
}
