//! Integration tests for the Escalation Scheduler
//!
//! Exercises full sweeps against shared stores: at-most-once escalation
//! across repeated ticks, restarts and racing scheduler instances, plus
//! the non-reentrancy and timeout guarantees and writes whose result is
//! lost to a timeout.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Barrier;
use workflow::store::StoreResult;
use workflow::{
    Change, ChangePatch, EngineConfig, EscalationScheduler, EscalationWrite, FailureStage,
    InMemoryStore, Incident, IncidentPatch, IncidentStatus, ManualClock, MemoryAuditLog,
    MemoryNotifier, Priority, RecordStore, StoreError, TickOutcome,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Delegates to an in-memory store, with hooks around the incident listing
/// and the escalation write.
struct WrappedStore {
    inner: Arc<InMemoryStore>,
    /// Every lister waits here after reading, so racing sweeps share a snapshot.
    barrier: Option<Barrier>,
    /// Simulated latency of the listing call.
    list_delay: Option<StdDuration>,
    /// Resolve every listed incident right after the snapshot is taken.
    resolve_after_list: bool,
    /// The escalation write commits, then the call hangs this long.
    stall_after_write: Option<StdDuration>,
    /// The escalation write commits only after this long, even if the
    /// caller stopped waiting.
    commit_delay: Option<StdDuration>,
}

impl WrappedStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            barrier: None,
            list_delay: None,
            resolve_after_list: false,
            stall_after_write: None,
            commit_delay: None,
        }
    }
}

#[async_trait]
impl RecordStore for WrappedStore {
    async fn list_active_incidents(&self) -> StoreResult<Vec<Incident>> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        let snapshot = self.inner.list_active_incidents().await;
        if self.resolve_after_list {
            for incident in snapshot.iter().flatten() {
                self.inner
                    .update_incident(&incident.id, IncidentPatch::status(IncidentStatus::Resolved))
                    .await?;
            }
        }
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        snapshot
    }

    async fn get_incident(&self, id: &str) -> StoreResult<Incident> {
        self.inner.get_incident(id).await
    }

    async fn update_incident(&self, id: &str, patch: IncidentPatch) -> StoreResult<Incident> {
        self.inner.update_incident(id, patch).await
    }

    async fn escalate_incident(
        &self,
        id: &str,
        escalated_at: DateTime<Utc>,
        assignee: Option<&str>,
    ) -> StoreResult<EscalationWrite> {
        if let Some(delay) = self.commit_delay {
            let inner = Arc::clone(&self.inner);
            let (id, assignee) = (id.to_string(), assignee.map(str::to_string));
            let commit = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner
                    .escalate_incident(&id, escalated_at, assignee.as_deref())
                    .await
            });
            return commit
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let write = self.inner.escalate_incident(id, escalated_at, assignee).await;
        if let Some(stall) = self.stall_after_write {
            tokio::time::sleep(stall).await;
        }
        write
    }

    async fn list_changes(&self) -> StoreResult<Vec<Change>> {
        self.inner.list_changes().await
    }

    async fn get_change(&self, id: &str) -> StoreResult<Change> {
        self.inner.get_change(id).await
    }

    async fn update_change(&self, id: &str, patch: ChangePatch) -> StoreResult<Change> {
        self.inner.update_change(id, patch).await
    }
}

fn scheduler(
    store: Arc<dyn RecordStore>,
    notifier: &MemoryNotifier,
    audit: &MemoryAuditLog,
    clock: &ManualClock,
) -> EscalationScheduler {
    EscalationScheduler::new(
        EngineConfig::default(),
        store,
        Arc::new(notifier.clone()),
        Arc::new(audit.clone()),
    )
    .with_clock(Arc::new(clock.clone()))
}

/// Test: a stale open incident escalates once, and only once
#[tokio::test]
async fn test_stale_incident_escalates_once() {
    let store = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(store.clone(), &notifier, &audit, &clock);

    let first = scheduler.tick().await.into_report().unwrap();
    assert_eq!(first.escalated, ["INC-1"]);

    let stored = store.get_incident("INC-1").await.unwrap();
    assert!(stored.escalated);
    assert_eq!(stored.escalated_at, Some(t0()));

    clock.advance(Duration::minutes(1));
    let second = scheduler.tick().await.into_report().unwrap();
    assert!(second.escalated.is_empty());
    assert_eq!(second.already_escalated, 0, "escalated incidents are not candidates");

    assert_eq!(notifier.count("escalation"), 1);
    assert_eq!(audit.for_target("INC-1").len(), 1);
    assert_eq!(audit.entries()[0].action, "escalation");
}

/// Test: a restarted scheduler does not re-escalate persisted incidents
#[tokio::test]
async fn test_restart_does_not_replay_escalation() {
    let store = InMemoryStore::with_records(
        [
            Incident::new("INC-1", Priority::Medium, t0() - Duration::hours(30)),
            Incident::new("INC-2", Priority::Medium, t0() - Duration::hours(2)),
        ],
        [],
    )
    .shared();
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());

    let before = scheduler(store.clone(), &notifier, &audit, &clock);
    before.tick().await;
    drop(before);

    // INC-2 crosses the threshold only after the restart.
    clock.advance(Duration::hours(23));
    let after = scheduler(store.clone(), &notifier, &audit, &clock);
    let report = after.tick().await.into_report().unwrap();

    assert_eq!(report.escalated, ["INC-2"]);
    assert_eq!(notifier.count("escalation"), 2);
    assert_eq!(audit.for_target("INC-1").len(), 1);
    assert_eq!(audit.for_target("INC-2").len(), 1);
}

/// Test: two schedulers racing on one store produce exactly one escalation
#[tokio::test]
async fn test_racing_schedulers_single_winner() {
    let inner = InMemoryStore::with_records(
        [
            Incident::new("INC-1", Priority::High, t0() - Duration::hours(26)),
            Incident::new("INC-2", Priority::Low, t0() - Duration::hours(40)),
        ],
        [],
    )
    .shared();
    let shared: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        barrier: Some(Barrier::new(2)),
        ..WrappedStore::new(inner.clone())
    });

    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let a = scheduler(shared.clone(), &notifier, &audit, &clock);
    let b = scheduler(shared.clone(), &notifier, &audit, &clock);

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    let (ra, rb) = (ra.into_report().unwrap(), rb.into_report().unwrap());

    // Both sweeps saw both incidents as candidates.
    assert_eq!(ra.escalated.len() + ra.already_escalated, 2);
    assert_eq!(rb.escalated.len() + rb.already_escalated, 2);
    // Each incident has exactly one winner.
    let mut winners: Vec<_> = ra.escalated.iter().chain(&rb.escalated).cloned().collect();
    winners.sort();
    assert_eq!(winners, ["INC-1", "INC-2"]);

    assert_eq!(notifier.count("escalation"), 2);
    assert_eq!(audit.entries().len(), 2);
    for incident in inner.all_incidents().unwrap() {
        assert!(incident.escalated);
        assert_eq!(incident.escalated_at, Some(t0()));
    }
}

/// Test: an overlapping tick is dropped rather than queued
#[tokio::test(start_paused = true)]
async fn test_overlapping_tick_skipped() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let slow: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        list_delay: Some(StdDuration::from_secs(2)),
        ..WrappedStore::new(inner)
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(slow, &notifier, &audit, &clock);

    let (first, second) = tokio::join!(scheduler.tick(), scheduler.tick());
    assert!(matches!(first, TickOutcome::Completed(_)));
    assert_eq!(second, TickOutcome::Skipped);
    assert_eq!(notifier.count("escalation"), 1);

    // Once the first finished, the guard is released.
    assert!(matches!(scheduler.tick().await, TickOutcome::Completed(_)));
}

/// Test: a stalled store read is cut off by the I/O timeout
#[tokio::test(start_paused = true)]
async fn test_stalled_store_times_out() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let stalled: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        list_delay: Some(StdDuration::from_secs(600)),
        ..WrappedStore::new(inner.clone())
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(stalled, &notifier, &audit, &clock);

    let report = scheduler.tick().await.into_report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, FailureStage::ReadStore);
    assert!(report.failures[0].error.contains("timed out"));
    assert!(notifier.sent().is_empty());
    assert!(!inner.get_incident("INC-1").await.unwrap().escalated);
}

/// Test: the timer loop sweeps on start and on every interval
#[tokio::test(start_paused = true)]
async fn test_timer_loop_picks_up_new_candidates() {
    let store = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let mut scheduler = scheduler(store.clone(), &notifier, &audit, &clock);

    assert!(scheduler.start());
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    assert_eq!(notifier.count("escalation"), 1);

    store
        .insert_incident(Incident::new("INC-2", Priority::Low, t0() - Duration::hours(48)))
        .unwrap();
    tokio::time::sleep(StdDuration::from_secs(61)).await;
    assert_eq!(notifier.count("escalation"), 2);

    scheduler.shutdown().await;
    store
        .insert_incident(Incident::new("INC-3", Priority::Low, t0() - Duration::hours(48)))
        .unwrap();
    tokio::time::sleep(StdDuration::from_secs(300)).await;
    assert_eq!(notifier.count("escalation"), 2, "no sweeps after shutdown");
}

/// Test: an incident resolved between the listing and the write is left alone
#[tokio::test]
async fn test_incident_resolved_mid_sweep_is_not_escalated() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let racing: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        resolve_after_list: true,
        ..WrappedStore::new(inner.clone())
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(racing, &notifier, &audit, &clock);

    let report = scheduler.tick().await.into_report().unwrap();
    assert!(report.escalated.is_empty());
    assert_eq!(report.not_eligible, 1);
    assert!(report.is_clean());
    assert_eq!(notifier.count("escalation"), 0);
    assert!(audit.entries().is_empty());

    let stored = inner.get_incident("INC-1").await.unwrap();
    assert_eq!(stored.status, IncidentStatus::Resolved);
    assert!(!stored.escalated);
    assert!(stored.escalated_at.is_none());
}

/// Test: a write that lands before its call times out is still announced
#[tokio::test(start_paused = true)]
async fn test_write_landed_before_timeout_is_announced() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let stalling: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        stall_after_write: Some(StdDuration::from_secs(30)),
        ..WrappedStore::new(inner.clone())
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(stalling, &notifier, &audit, &clock);

    let report = scheduler.tick().await.into_report().unwrap();
    assert_eq!(report.escalated, ["INC-1"]);
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(notifier.count("escalation"), 1);
    assert_eq!(audit.for_target("INC-1").len(), 1);

    clock.advance(Duration::minutes(1));
    let again = scheduler.tick().await.into_report().unwrap();
    assert!(again.escalated.is_empty());
    assert_eq!(notifier.count("escalation"), 1);
}

/// Test: a write that lands after its call timed out is announced next sweep
#[tokio::test(start_paused = true)]
async fn test_late_write_is_announced_on_next_sweep() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let lagging: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        commit_delay: Some(StdDuration::from_secs(8)),
        ..WrappedStore::new(inner.clone())
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let scheduler = scheduler(lagging, &notifier, &audit, &clock);

    let first = scheduler.tick().await.into_report().unwrap();
    assert!(first.escalated.is_empty());
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].stage, FailureStage::WriteStore);
    assert!(first.failures[0].error.contains("timed out"));
    assert_eq!(notifier.count("escalation"), 0);

    // The abandoned write commits in the background.
    tokio::time::sleep(StdDuration::from_secs(10)).await;
    let stored = inner.get_incident("INC-1").await.unwrap();
    assert!(stored.escalated);
    assert_eq!(stored.escalated_at, Some(t0()));

    clock.advance(Duration::minutes(1));
    let second = scheduler.tick().await.into_report().unwrap();
    assert_eq!(second.escalated, ["INC-1"]);
    assert!(second.is_clean(), "{:?}", second.failures);
    assert_eq!(notifier.count("escalation"), 1);
    let entries = audit.for_target("INC-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].timestamp, t0());

    clock.advance(Duration::minutes(1));
    scheduler.tick().await;
    assert_eq!(notifier.count("escalation"), 1);
    assert_eq!(audit.entries().len(), 1);
}

/// Test: stopping mid-sweep lets that sweep persist and announce
#[tokio::test(start_paused = true)]
async fn test_stop_during_sweep_keeps_its_writes() {
    let inner = InMemoryStore::with_records(
        [Incident::new("INC-1", Priority::Low, t0() - Duration::hours(25))],
        [],
    )
    .shared();
    let slow: Arc<dyn RecordStore> = Arc::new(WrappedStore {
        list_delay: Some(StdDuration::from_secs(2)),
        ..WrappedStore::new(inner.clone())
    });
    let notifier = MemoryNotifier::new();
    let audit = MemoryAuditLog::new();
    let clock = ManualClock::new(t0());
    let mut scheduler = scheduler(slow, &notifier, &audit, &clock);

    assert!(scheduler.start());
    // The first sweep is still waiting on the listing.
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert!(!inner.get_incident("INC-1").await.unwrap().escalated);

    assert!(scheduler.stop());
    assert!(!scheduler.is_running());
    scheduler.shutdown().await;

    let stored = inner.get_incident("INC-1").await.unwrap();
    assert!(stored.escalated);
    assert_eq!(stored.escalated_at, Some(t0()));
    assert_eq!(notifier.count("escalation"), 1);
    assert_eq!(audit.for_target("INC-1").len(), 1);

    tokio::time::sleep(StdDuration::from_secs(300)).await;
    assert_eq!(notifier.count("escalation"), 1, "no sweeps after stop");
}
