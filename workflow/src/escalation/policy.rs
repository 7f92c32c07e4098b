//! Escalation Policy: which incidents a sweep promotes.
//!
//! Escalation is a separate policy from SLA breach: its threshold comes
//! from host configuration, not the priority tier table. An incident is a
//! candidate when it is still `open`, has never been escalated, has a
//! usable SLA clock, and has been open longer than the threshold.

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::model::{Incident, IncidentStatus};
use crate::sla::{format_duration, SlaTier};

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    threshold: Duration,
    assignee: Option<String>,
}

impl EscalationPolicy {
    pub fn new(threshold: Duration, assignee: Option<String>) -> Self {
        Self {
            threshold,
            assignee,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.escalation_threshold(),
            config.auto_assignee().map(str::to_string),
        )
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Assignee written on escalation when the incident has none.
    pub fn assignee(&self) -> Option<&str> {
        self.assignee.as_deref()
    }

    /// How long `incident` has been open, if it can be escalated at all.
    ///
    /// Unclassifiable incidents (unknown priority, unreadable or out of range
    /// creation time) are never escalated.
    pub fn open_for(&self, incident: &Incident, now: DateTime<Utc>) -> Option<Duration> {
        if incident.status != IncidentStatus::Open || incident.escalated {
            return None;
        }
        let tier = SlaTier::for_priority(&incident.priority)?;
        let created = incident.created_at?;
        created.checked_add_signed(tier.resolution)?;
        Some(now - created)
    }

    /// Whether a sweep at `now` should escalate `incident`.
    pub fn is_due(&self, incident: &Incident, now: DateTime<Utc>) -> bool {
        self.open_for(incident, now)
            .is_some_and(|age| age > self.threshold)
    }

    /// Audit detail for an escalation that fired at `now`.
    pub fn describe(&self, incident: &Incident, now: DateTime<Utc>) -> String {
        let age = incident
            .created_at
            .map(|created| format_duration(now - created))
            .unwrap_or_else(|| "unknown time".to_string());
        let mut detail = format!(
            "Incident {} ({} priority) open for {}, exceeding {} escalation threshold",
            incident.id,
            incident.priority,
            age,
            format_duration(self.threshold)
        );
        if let Some(assignee) = &incident.assignee {
            detail.push_str(&format!("; assigned to {assignee}"));
        }
        detail
    }
}
