//! SLA Calculator: resolution deadlines and breach/warning bands.
//!
//! Each priority maps to a fixed tier. Only the resolution target drives
//! classification; the response target is carried for display.
//!
//! | Priority | Response | Resolution |
//! |---|---|---|
//! | high | 1h | 4h |
//! | medium | 4h | 24h |
//! | low | 24h | 72h |
//!
//! ```text
//! created ─────────────── 75% ─────── deadline ──────────▶
//!          ok                 warning          breach
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Incident, Priority};

/// Classification of an incident against its resolution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    /// More than a quarter of the resolution window left.
    Ok,
    /// Inside the last quarter of the window.
    Warning,
    /// Deadline reached or passed.
    Breach,
    /// Incident is resolved or closed; no clock running.
    Completed,
    /// Priority or creation time unusable. Never alerts, never escalates.
    Unknown,
}

impl SlaStatus {
    /// Severity ordering for the running clock: ok < warning < breach.
    /// `None` for statuses that carry no clock.
    pub fn severity(self) -> Option<u8> {
        match self {
            Self::Ok => Some(0),
            Self::Warning => Some(1),
            Self::Breach => Some(2),
            Self::Completed | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Breach => write!(f, "breach"),
            Self::Completed => write!(f, "completed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Response and resolution targets for one priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaTier {
    /// Time to first response. Informational only.
    pub response: Duration,
    /// Time to resolution. Drives classification.
    pub resolution: Duration,
}

impl SlaTier {
    pub fn for_priority(priority: &Priority) -> Option<SlaTier> {
        let (response, resolution) = match priority {
            Priority::High => (1, 4),
            Priority::Medium => (4, 24),
            Priority::Low => (24, 72),
            Priority::Unrecognized(_) => return None,
        };
        Some(SlaTier {
            response: Duration::hours(response),
            resolution: Duration::hours(resolution),
        })
    }

    /// Start of the warning band, measured back from the deadline.
    pub fn warning_window(&self) -> Duration {
        self.resolution / 4
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaAssessment {
    pub status: SlaStatus,
    /// Signed time until the deadline; negative once breached.
    #[serde(rename = "remaining_secs", with = "opt_duration_secs")]
    pub remaining: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    /// Display text only.
    pub message: String,
}

impl SlaAssessment {
    fn without_clock(status: SlaStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            remaining: None,
            deadline: None,
            message: message.into(),
        }
    }
}

/// Classify `incident` against its resolution target at `now`.
pub fn classify(incident: &Incident, now: DateTime<Utc>) -> SlaAssessment {
    if incident.status.stops_sla_clock() {
        return SlaAssessment::without_clock(
            SlaStatus::Completed,
            format!("Incident {}; SLA clock stopped", incident.status),
        );
    }

    let Some(tier) = SlaTier::for_priority(&incident.priority) else {
        return SlaAssessment::without_clock(
            SlaStatus::Unknown,
            format!("No SLA tier for priority '{}'", incident.priority),
        );
    };
    let Some(created_at) = incident.created_at else {
        return SlaAssessment::without_clock(SlaStatus::Unknown, "Creation time unavailable");
    };

    let Some(deadline) = created_at.checked_add_signed(tier.resolution) else {
        return SlaAssessment::without_clock(SlaStatus::Unknown, "Creation time out of range");
    };
    let remaining = deadline - now;

    let (status, message) = if remaining <= Duration::zero() {
        (
            SlaStatus::Breach,
            format!("SLA breached by {}", format_duration(-remaining)),
        )
    } else if remaining <= tier.warning_window() {
        (
            SlaStatus::Warning,
            format!("SLA at risk: {} remaining", format_duration(remaining)),
        )
    } else {
        (
            SlaStatus::Ok,
            format!("Resolve within {}", format_duration(remaining)),
        )
    };

    SlaAssessment {
        status,
        remaining: Some(remaining),
        deadline: Some(deadline),
        message,
    }
}

/// Human-readable duration: `"2d 3h"`, `"5h 12m"` or `"40m"`.
///
/// Negative input is clamped to zero.
pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    let hours = minutes / 60;
    if hours >= 24 {
        format!("{}d {}h", hours / 24, hours % 24)
    } else if hours >= 1 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{}m", minutes)
    }
}

/// Counts of assessments per status over one batch of incidents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaSummary {
    pub ok: usize,
    pub warning: usize,
    pub breach: usize,
    pub completed: usize,
    pub unknown: usize,
}

impl SlaSummary {
    pub fn from_assessments<'a>(assessments: impl IntoIterator<Item = &'a SlaAssessment>) -> Self {
        let mut summary = Self::default();
        for assessment in assessments {
            match assessment.status {
                SlaStatus::Ok => summary.ok += 1,
                SlaStatus::Warning => summary.warning += 1,
                SlaStatus::Breach => summary.breach += 1,
                SlaStatus::Completed => summary.completed += 1,
                SlaStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.ok + self.warning + self.breach + self.completed + self.unknown
    }

    /// Worst running-clock status, if any incident has a clock.
    pub fn worst(&self) -> Option<SlaStatus> {
        if self.breach > 0 {
            Some(SlaStatus::Breach)
        } else if self.warning > 0 {
            Some(SlaStatus::Warning)
        } else if self.ok > 0 {
            Some(SlaStatus::Ok)
        } else {
            None
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "SLA: {} ok, {} warning, {} breach, {} completed, {} unknown [{}]",
            self.ok,
            self.warning,
            self.breach,
            self.completed,
            self.unknown,
            self.worst()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "idle".to_string()),
        )
    }
}

mod opt_duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<i64>::deserialize(d)?
            .map(|secs| {
                Duration::try_seconds(secs)
                    .ok_or_else(|| serde::de::Error::custom(format!("{secs}s is out of range")))
            })
            .transpose()
    }
}
