//! Incident record and its status / priority enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{lenient_timestamp, present, UnknownValue};

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub const ALL: [IncidentStatus; 4] = [
        IncidentStatus::Open,
        IncidentStatus::InProgress,
        IncidentStatus::Resolved,
        IncidentStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Display label for status pickers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
        }
    }

    /// Legal targets from this status, in display order.
    ///
    /// ```text
    /// open        -> in_progress, closed
    /// in_progress -> resolved, open
    /// resolved    -> closed, in_progress
    /// closed      -> in_progress
    /// ```
    pub fn successors(self) -> &'static [IncidentStatus] {
        use IncidentStatus::*;
        match self {
            Open => &[InProgress, Closed],
            InProgress => &[Resolved, Open],
            Resolved => &[Closed, InProgress],
            Closed => &[InProgress],
        }
    }

    /// Whether moving to `to` is allowed. Staying put always is.
    pub fn can_transition_to(self, to: IncidentStatus) -> bool {
        self == to || self.successors().contains(&to)
    }

    /// Resolved and closed incidents no longer run an SLA clock.
    pub fn stops_sla_clock(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    pub fn is_active(self) -> bool {
        !self.stops_sla_clock()
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue::new("incident status", s))
    }
}

/// Incident priority.
///
/// Values outside the known tiers are kept verbatim in [`Priority::Unrecognized`]
/// so the record still loads and SLA classification can report it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    High,
    Medium,
    Low,
    Unrecognized(String),
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<&str> for Priority {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The slice of an incident record the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: IncidentStatus,
    pub priority: Priority,
    /// Start of the SLA clock. `None` when missing or unreadable.
    #[serde(
        default,
        alias = "createdAt",
        deserialize_with = "lenient_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "resolvedAt",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated: bool,
    #[serde(
        default,
        alias = "escalatedAt",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Incident {
    /// A freshly opened, unassigned incident.
    pub fn new(id: impl Into<String>, priority: Priority, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: None,
            status: IncidentStatus::Open,
            priority,
            created_at: Some(created_at),
            resolved_at: None,
            escalated: false,
            escalated_at: None,
            assignee: None,
        }
    }

    pub fn with_status(mut self, status: IncidentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Partial update for [`Incident`].
///
/// Outer `None` leaves a field untouched; `Some(None)` clears an optional
/// field. Escalation fields are only written through
/// [`RecordStore::escalate_incident`](crate::store::RecordStore::escalate_incident).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub resolved_at: Option<Option<DateTime<Utc>>>,
}

impl IncidentPatch {
    pub fn status(status: IncidentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, incident: &mut Incident) {
        if let Some(status) = self.status {
            incident.status = status;
        }
        if let Some(priority) = &self.priority {
            incident.priority = priority.clone();
        }
        if let Some(assignee) = &self.assignee {
            incident.assignee = assignee.clone();
        }
        if let Some(resolved_at) = self.resolved_at {
            incident.resolved_at = resolved_at;
        }
    }
}
