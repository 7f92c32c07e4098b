//! Escalation Scheduler: the periodic SLA / escalation sweep.
//!
//! One tokio task per scheduler. Each tick:
//!
//! ```text
//! list_active_incidents ──▶ classify each ──▶ one batched sla_violation
//!                                         └─▶ one batched sla_warning
//!                       └─▶ due for escalation?
//!                             └─▶ escalate_incident (compare-and-set)
//!                                   ├─ Applied          → escalation event + audit entry
//!                                   ├─ AlreadyEscalated → nothing
//!                                   ├─ NotEligible      → nothing
//!                                   └─ error            → re-read the record
//! ```
//!
//! Ticks never overlap: a tick that fires while another is running is
//! dropped. Every collaborator call is bounded by the configured I/O
//! timeout, and every failure is logged and recorded in the
//! [`TickReport`] instead of propagating.
//!
//! A timed-out write may still land. After a failed write the sweep reads
//! the record back: if it carries this sweep's `escalated_at`, the
//! escalation is announced as usual. Writes that cannot be confirmed yet
//! are remembered and checked again at the start of later sweeps, so a
//! write that lands late is still announced exactly once.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditError, SharedAuditSink, ESCALATION_ACTION};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::escalation::policy::EscalationPolicy;
use crate::escalation::report::{FailureStage, TickOutcome, TickReport};
use crate::model::{Incident, IncidentStatus};
use crate::notify::{Notification, NotifyError, SharedNotifier};
use crate::sla::{classify, SlaStatus};
use crate::store::{EscalationWrite, SharedRecordStore, StoreError};

/// Escalation timestamps of writes that failed without confirmation, by
/// incident id.
type Unconfirmed = BTreeMap<String, Vec<DateTime<Utc>>>;

/// Everything a sweep needs, shared between the scheduler and its task.
struct Sweep {
    config: EngineConfig,
    policy: EscalationPolicy,
    store: SharedRecordStore,
    notifier: SharedNotifier,
    audit: SharedAuditSink,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
    unconfirmed: Mutex<Unconfirmed>,
}

/// What a read-back says about escalation writes whose result was lost.
enum WriteCheck {
    /// The record carries one of our timestamps: the write landed.
    Ours(Incident),
    /// Escalated by someone else, no longer open, or gone.
    Settled,
    /// Not escalated yet, or unreadable.
    Pending,
}

/// Clears the in-flight flag when a sweep ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Sweep {
    /// Run `call` under the I/O timeout, mapping expiry to `timed_out`.
    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
        timed_out: fn(Duration) -> E,
    ) -> Result<T, E> {
        let limit = self.config.io_timeout();
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(timed_out(limit)))
    }

    fn unconfirmed(&self) -> MutexGuard<'_, Unconfirmed> {
        self.unconfirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous sweep still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let now = self.clock.now();
        let mut report = TickReport::new(now);

        self.reconcile(now, &mut report).await;

        let incidents = match self
            .bounded(self.store.list_active_incidents(), StoreError::Timeout)
            .await
        {
            Ok(incidents) => incidents,
            Err(e) => {
                error!(error = %e, "Failed to read incidents, sweep deferred to next tick");
                report.fail(FailureStage::ReadStore, None, e.to_string());
                return TickOutcome::Completed(report);
            }
        };

        let active: Vec<Incident> = incidents.into_iter().filter(Incident::is_active).collect();
        report.checked = active.len();

        for incident in &active {
            let assessment = classify(incident, now);
            match assessment.status {
                SlaStatus::Breach => report.breaches.push(incident.id.clone()),
                SlaStatus::Warning => report.warnings.push(incident.id.clone()),
                SlaStatus::Unknown => {
                    debug!(incident_id = %incident.id, reason = %assessment.message, "Unclassifiable SLA");
                }
                SlaStatus::Ok | SlaStatus::Completed => {}
            }
        }

        if !report.breaches.is_empty() {
            let batch = Notification::SlaViolation {
                incident_ids: report.breaches.clone(),
            };
            self.send(batch, None, &mut report).await;
        }
        if !report.warnings.is_empty() {
            let batch = Notification::SlaWarning {
                incident_ids: report.warnings.clone(),
            };
            self.send(batch, None, &mut report).await;
        }

        for incident in active.iter().filter(|i| self.policy.is_due(i, now)) {
            self.escalate(incident, now, &mut report).await;
        }

        if report.is_clean() {
            info!(summary = %report.summary(), "Sweep complete");
        } else {
            warn!(summary = %report.summary(), "Sweep complete with failures");
        }
        TickOutcome::Completed(report)
    }

    /// Announce earlier writes that have since been confirmed and drop the
    /// ones that no longer matter.
    async fn reconcile(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let pending: Vec<_> = self
            .unconfirmed()
            .iter()
            .map(|(id, attempts)| (id.clone(), attempts.clone()))
            .collect();

        for (id, attempts) in pending {
            match self.check_write(&id, &attempts).await {
                WriteCheck::Ours(stored) => {
                    self.unconfirmed().remove(&id);
                    info!(incident_id = %id, "Earlier escalation write confirmed");
                    self.announce(&stored, now, report).await;
                }
                WriteCheck::Settled => {
                    self.unconfirmed().remove(&id);
                }
                WriteCheck::Pending => {}
            }
        }
    }

    /// Read the record back to learn whether a write stamped with one of
    /// `attempts` landed.
    async fn check_write(&self, id: &str, attempts: &[DateTime<Utc>]) -> WriteCheck {
        match self
            .bounded(self.store.get_incident(id), StoreError::Timeout)
            .await
        {
            Ok(stored)
                if stored.escalated
                    && stored.escalated_at.is_some_and(|at| attempts.contains(&at)) =>
            {
                WriteCheck::Ours(stored)
            }
            Ok(stored) if stored.escalated || stored.status != IncidentStatus::Open => {
                WriteCheck::Settled
            }
            Ok(_) => WriteCheck::Pending,
            Err(StoreError::NotFound(_)) => WriteCheck::Settled,
            Err(e) => {
                warn!(incident_id = id, error = %e, "Could not re-read incident after failed write");
                WriteCheck::Pending
            }
        }
    }

    async fn escalate(&self, incident: &Incident, now: DateTime<Utc>, report: &mut TickReport) {
        let id = incident.id.as_str();
        let write = self.store.escalate_incident(id, now, self.policy.assignee());
        match self.bounded(write, StoreError::Timeout).await {
            Ok(EscalationWrite::Applied(stored)) => {
                self.unconfirmed().remove(id);
                self.announce(&stored, now, report).await;
            }
            Ok(EscalationWrite::AlreadyEscalated) => {
                // Our own earlier write may be the one that won.
                let earlier = self.unconfirmed().remove(id);
                if let Some(attempts) = earlier {
                    if let WriteCheck::Ours(stored) = self.check_write(id, &attempts).await {
                        self.announce(&stored, now, report).await;
                        return;
                    }
                }
                debug!(incident_id = id, "Already escalated elsewhere");
                report.already_escalated += 1;
            }
            Ok(EscalationWrite::NotEligible(status)) => {
                debug!(incident_id = id, %status, "Incident no longer open, not escalated");
                self.unconfirmed().remove(id);
                report.not_eligible += 1;
            }
            Err(e) => {
                let mut attempts = self.unconfirmed().get(id).cloned().unwrap_or_default();
                attempts.push(now);
                match self.check_write(id, &attempts).await {
                    WriteCheck::Ours(stored) => {
                        warn!(incident_id = id, error = %e, "Escalation write reported an error but landed");
                        self.unconfirmed().remove(id);
                        self.announce(&stored, now, report).await;
                    }
                    WriteCheck::Settled => {
                        debug!(incident_id = id, error = %e, "Escalation write failed, incident settled elsewhere");
                        self.unconfirmed().remove(id);
                    }
                    WriteCheck::Pending => {
                        error!(incident_id = id, error = %e, "Failed to persist escalation");
                        report.fail(FailureStage::WriteStore, Some(id), e.to_string());
                        self.unconfirmed().insert(id.to_string(), attempts);
                    }
                }
            }
        }
    }

    /// Emit the escalation event and audit entry for a persisted escalation.
    async fn announce(&self, stored: &Incident, now: DateTime<Utc>, report: &mut TickReport) {
        let at = stored.escalated_at.unwrap_or(now);
        info!(
            incident_id = %stored.id,
            priority = %stored.priority,
            assignee = stored.assignee.as_deref().unwrap_or("-"),
            "Escalating stale incident"
        );
        report.escalated.push(stored.id.clone());

        let event = Notification::Escalation {
            incident_id: stored.id.clone(),
        };
        self.send(event, Some(&stored.id), report).await;

        let entry = AuditEntry::new(
            ESCALATION_ACTION,
            stored.id.clone(),
            self.policy.describe(stored, at),
            at,
        );
        if let Err(e) = self
            .bounded(self.audit.record(entry), AuditError::Timeout)
            .await
        {
            error!(incident_id = %stored.id, error = %e, "Failed to append audit entry");
            report.fail(FailureStage::Audit, Some(&stored.id), e.to_string());
        }
    }

    async fn send(
        &self,
        notification: Notification,
        incident_id: Option<&str>,
        report: &mut TickReport,
    ) {
        let event_type = notification.event_type();
        if let Err(e) = self
            .bounded(self.notifier.notify(notification), NotifyError::Timeout)
            .await
        {
            error!(event_type, incident_id, error = %e, "Failed to deliver notification");
            report.fail(FailureStage::Notify, incident_id, e.to_string());
        }
    }
}

/// Owns the periodic sweep task.
///
/// `start`/`stop` are meant for a single controlling task. Stopping lets an
/// in-flight sweep finish and persist; it only prevents the next one.
pub struct EscalationScheduler {
    sweep: Arc<Sweep>,
    task: Option<(JoinHandle<()>, CancellationToken)>,
}

impl EscalationScheduler {
    pub fn new(
        config: EngineConfig,
        store: SharedRecordStore,
        notifier: SharedNotifier,
        audit: SharedAuditSink,
    ) -> Self {
        let config = config.normalized();
        let sweep = Sweep {
            policy: EscalationPolicy::from_config(&config),
            config,
            store,
            notifier,
            audit,
            clock: Arc::new(SystemClock),
            in_flight: AtomicBool::new(false),
            unconfirmed: Mutex::new(Unconfirmed::new()),
        };
        Self {
            sweep: Arc::new(sweep),
            task: None,
        }
    }

    /// Replace the wall clock. Only takes effect while stopped.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        match Arc::get_mut(&mut self.sweep) {
            Some(sweep) => sweep.clock = clock,
            None => warn!("Scheduler is running, clock not replaced"),
        }
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.sweep.config
    }

    pub fn interval(&self) -> Duration {
        self.sweep.config.tick_interval()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|(handle, cancel)| !cancel.is_cancelled() && !handle.is_finished())
    }

    /// Start sweeping: once immediately, then every interval.
    ///
    /// Returns `false` (and does nothing) when already running or when
    /// called outside a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            warn!("Escalation scheduler already running");
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Escalation scheduler needs a tokio runtime");
                return false;
            }
        };

        let period = self.interval();
        let cancel = CancellationToken::new();
        let sweep = Arc::clone(&self.sweep);
        let stop = cancel.clone();

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        // Not raced against cancellation: a started sweep
                        // always finishes its writes.
                        sweep.run().await;
                    }
                }
            }
            debug!("Escalation scheduler loop exited");
        });

        info!(interval_secs = period.as_secs(), "Escalation scheduler started");
        self.task = Some((handle, cancel));
        true
    }

    /// Stop after any in-flight sweep. Returns `false` if not running.
    pub fn stop(&mut self) -> bool {
        match &self.task {
            Some((_, cancel)) if !cancel.is_cancelled() => {
                cancel.cancel();
                info!("Escalation scheduler stopped");
                true
            }
            _ => false,
        }
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(&mut self) {
        if let Some((handle, cancel)) = self.task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "Escalation scheduler task ended abnormally");
            }
            info!("Escalation scheduler shut down");
        }
    }

    /// Run one sweep now, independent of the timer.
    ///
    /// Shares the non-reentrancy guard with the timer loop.
    pub async fn tick(&self) -> TickOutcome {
        self.sweep.run().await
    }
}

impl Drop for EscalationScheduler {
    fn drop(&mut self) {
        if let Some((_, cancel)) = self.task.take() {
            cancel.cancel();
        }
    }
}
