//! Workflow Service: validated status changes against the record store.
//!
//! The host's mutation path: check the transition graph, then write.
//! Incidents also get their `resolved_at` maintained here: stamped when
//! the SLA clock stops, cleared when the incident is reopened.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::model::{
    Change, ChangePatch, ChangeStatus, EntityKind, Incident, IncidentPatch, IncidentStatus,
};
use crate::sla::{classify, SlaAssessment};
use crate::store::{SharedRecordStore, StoreError};
use crate::transition::{available_transitions, is_valid_transition, StatusOption};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid {kind} transition {from} -> {to}: {reason}")]
    InvalidTransition {
        kind: EntityKind,
        from: String,
        to: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

pub struct WorkflowService {
    store: SharedRecordStore,
    clock: Arc<dyn Clock>,
}

impl WorkflowService {
    pub fn new(store: SharedRecordStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Move incident `id` to status `to` if the graph allows it.
    pub async fn set_incident_status(&self, id: &str, to: &str) -> WorkflowResult<Incident> {
        let incident = self.store.get_incident(id).await?;
        let from = incident.status;

        let check = is_valid_transition(EntityKind::Incident, from.as_str(), to);
        if !check.valid {
            return Err(WorkflowError::InvalidTransition {
                kind: EntityKind::Incident,
                from: from.to_string(),
                to: to.to_string(),
                reason: check.reason,
            });
        }
        let to: IncidentStatus = to.parse().map_err(|_| WorkflowError::InvalidTransition {
            kind: EntityKind::Incident,
            from: from.to_string(),
            to: to.to_string(),
            reason: "unknown status".to_string(),
        })?;

        if from == to {
            debug!(incident_id = id, status = %to, "Status unchanged");
            return Ok(incident);
        }

        let patch = incident_patch(&incident, to, self.clock.now());
        let updated = self.store.update_incident(id, patch).await?;
        info!(incident_id = id, from = %from, to = %to, "Incident status changed");
        Ok(updated)
    }

    /// Move change `id` to status `to` if the graph allows it.
    pub async fn set_change_status(&self, id: &str, to: &str) -> WorkflowResult<Change> {
        let change = self.store.get_change(id).await?;
        let from = change.status;

        let check = is_valid_transition(EntityKind::Change, from.as_str(), to);
        if !check.valid {
            return Err(WorkflowError::InvalidTransition {
                kind: EntityKind::Change,
                from: from.to_string(),
                to: to.to_string(),
                reason: check.reason,
            });
        }
        let to: ChangeStatus = to.parse().map_err(|_| WorkflowError::InvalidTransition {
            kind: EntityKind::Change,
            from: from.to_string(),
            to: to.to_string(),
            reason: "unknown status".to_string(),
        })?;

        if from == to {
            return Ok(change);
        }

        let updated = self.store.update_change(id, ChangePatch::status(to)).await?;
        info!(change_id = id, from = %from, to = %to, "Change status changed");
        Ok(updated)
    }

    /// Status picker options for an existing incident.
    pub async fn incident_options(&self, id: &str) -> WorkflowResult<Vec<StatusOption>> {
        let incident = self.store.get_incident(id).await?;
        Ok(available_transitions(
            EntityKind::Incident,
            incident.status.as_str(),
        ))
    }

    /// Status picker options for an existing change.
    pub async fn change_options(&self, id: &str) -> WorkflowResult<Vec<StatusOption>> {
        let change = self.store.get_change(id).await?;
        Ok(available_transitions(EntityKind::Change, change.status.as_str()))
    }

    /// Current SLA standing of incident `id`.
    pub async fn incident_sla(&self, id: &str) -> WorkflowResult<SlaAssessment> {
        let incident = self.store.get_incident(id).await?;
        Ok(classify(&incident, self.clock.now()))
    }
}

/// Status patch with the matching `resolved_at` bookkeeping.
fn incident_patch(incident: &Incident, to: IncidentStatus, now: DateTime<Utc>) -> IncidentPatch {
    let resolved_at = if to.stops_sla_clock() {
        // resolved -> closed keeps the original resolution time.
        match incident.resolved_at {
            Some(_) if incident.status.stops_sla_clock() => None,
            _ => Some(Some(now)),
        }
    } else if incident.resolved_at.is_some() {
        Some(None)
    } else {
        None
    };

    IncidentPatch {
        status: Some(to),
        resolved_at,
        ..IncidentPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Priority;
    use crate::sla::SlaStatus;
    use crate::store::{InMemoryStore, RecordStore};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    fn service() -> (WorkflowService, Arc<InMemoryStore>, ManualClock) {
        let store = InMemoryStore::with_records(
            [Incident::new("INC-1", Priority::High, t0())],
            [Change::new("CHG-1", "standard")],
        )
        .shared();
        let clock = ManualClock::new(t0());
        let service = WorkflowService::new(store.clone()).with_clock(Arc::new(clock.clone()));
        (service, store, clock)
    }

    #[tokio::test]
    async fn test_resolution_stamps_and_reopen_clears() {
        let (service, store, clock) = service();

        clock.advance(Duration::hours(1));
        service.set_incident_status("INC-1", "in_progress").await.unwrap();
        assert!(store.get_incident("INC-1").await.unwrap().resolved_at.is_none());

        clock.advance(Duration::hours(1));
        let resolved = service.set_incident_status("INC-1", "resolved").await.unwrap();
        let resolved_at = t0() + Duration::hours(2);
        assert_eq!(resolved.resolved_at, Some(resolved_at));

        clock.advance(Duration::hours(1));
        let closed = service.set_incident_status("INC-1", "closed").await.unwrap();
        assert_eq!(closed.resolved_at, Some(resolved_at), "close keeps resolution time");

        let reopened = service.set_incident_status("INC-1", "in_progress").await.unwrap();
        assert!(reopened.resolved_at.is_none());
        assert_eq!(reopened.status, IncidentStatus::InProgress);
    }

    #[tokio::test]
    async fn test_direct_close_stamps_resolution() {
        let (service, _, _) = service();
        let closed = service.set_incident_status("INC-1", "closed").await.unwrap();
        assert_eq!(closed.resolved_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected_without_write() {
        let (service, store, _) = service();
        service.set_incident_status("INC-1", "closed").await.unwrap();

        let err = service.set_incident_status("INC-1", "open").await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition { ref from, ref to, .. } if from == "closed" && to == "open"
        ));
        assert_eq!(
            store.get_incident("INC-1").await.unwrap().status,
            IncidentStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_unknown_status_and_missing_record() {
        let (service, _, _) = service();
        let err = service.set_incident_status("INC-1", "paused").await.unwrap_err();
        assert!(err.to_string().contains("unknown status"));

        let err = service.set_incident_status("INC-404", "closed").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_change_workflow() {
        let (service, _, _) = service();
        for status in ["pending", "approved", "in_progress", "completed"] {
            let change = service.set_change_status("CHG-1", status).await.unwrap();
            assert_eq!(change.status.as_str(), status);
        }
        assert!(service.set_change_status("CHG-1", "in_progress").await.is_err());
        assert!(service.set_change_status("CHG-1", "completed").await.is_ok());

        let options = service.change_options("CHG-1").await.unwrap();
        assert_eq!(options.len(), 1);
    }

    #[tokio::test]
    async fn test_options_and_sla() {
        let (service, _, clock) = service();
        let options = service.incident_options("INC-1").await.unwrap();
        let values: Vec<_> = options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, ["open", "in_progress", "closed"]);

        clock.advance(Duration::hours(5));
        let sla = service.incident_sla("INC-1").await.unwrap();
        assert_eq!(sla.status, SlaStatus::Breach);
    }
}
