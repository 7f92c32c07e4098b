//! Transition Validator: legal status moves for incidents and changes.
//!
//! Pure lookups over the per-kind transition graphs defined on
//! [`IncidentStatus::successors`] and [`ChangeStatus::successors`]. Inputs
//! arrive as raw strings from the host; anything that is not a member of
//! the kind's status enum is rejected with an "unknown status" reason
//! instead of an error.
//!
//! ```text
//! Incident                         Change
//! open        → in_progress|closed  draft       → pending
//! in_progress → resolved|open       pending     → approved|rejected
//! resolved    → closed|in_progress  approved    → in_progress
//! closed      → in_progress         in_progress → completed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{ChangeStatus, EntityKind, IncidentStatus};

/// Outcome of a transition check. Never an error: callers branch on `valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCheck {
    pub valid: bool,
    pub reason: String,
}

impl TransitionCheck {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// One entry of a status picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub value: String,
    pub label: String,
}

/// A status of either entity kind, parsed from its raw form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyStatus {
    Incident(IncidentStatus),
    Change(ChangeStatus),
}

impl AnyStatus {
    /// Parse `raw` as a status of `kind`.
    pub fn parse(kind: EntityKind, raw: &str) -> Option<Self> {
        match kind {
            EntityKind::Incident => raw.parse().ok().map(Self::Incident),
            EntityKind::Change => raw.parse().ok().map(Self::Change),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incident(s) => s.as_str(),
            Self::Change(s) => s.as_str(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Incident(s) => s.label(),
            Self::Change(s) => s.label(),
        }
    }

    fn successors(self) -> Vec<AnyStatus> {
        match self {
            Self::Incident(s) => s.successors().iter().copied().map(Self::Incident).collect(),
            Self::Change(s) => s.successors().iter().copied().map(Self::Change).collect(),
        }
    }

    fn can_transition_to(self, to: AnyStatus) -> bool {
        match (self, to) {
            (Self::Incident(from), Self::Incident(to)) => from.can_transition_to(to),
            (Self::Change(from), Self::Change(to)) => from.can_transition_to(to),
            _ => false,
        }
    }
}

impl fmt::Display for AnyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether `kind` may move from `from` to `to`.
pub fn is_valid_transition(kind: EntityKind, from: &str, to: &str) -> TransitionCheck {
    let Some(from_status) = AnyStatus::parse(kind, from) else {
        return TransitionCheck::deny(format!("unknown status '{from}' for {kind}"));
    };
    let Some(to_status) = AnyStatus::parse(kind, to) else {
        return TransitionCheck::deny(format!("unknown status '{to}' for {kind}"));
    };

    if from_status == to_status {
        return TransitionCheck::allow(format!("{kind} stays {from_status}"));
    }

    if from_status.can_transition_to(to_status) {
        TransitionCheck::allow(format!(
            "{kind} may move from {} to {}",
            from_status.label(),
            to_status.label()
        ))
    } else {
        let allowed = from_status.successors();
        let allowed = if allowed.is_empty() {
            "none (terminal)".to_string()
        } else {
            allowed
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join(", ")
        };
        TransitionCheck::deny(format!(
            "cannot move {kind} from {} to {}; allowed: {allowed}",
            from_status.label(),
            to_status.label()
        ))
    }
}

/// Options for a status picker: the current status first, then its
/// legal targets in graph order.
pub fn available_transitions(kind: EntityKind, from: &str) -> Vec<StatusOption> {
    let Some(current) = AnyStatus::parse(kind, from) else {
        return vec![StatusOption {
            value: from.to_string(),
            label: from.to_string(),
        }];
    };

    std::iter::once(current)
        .chain(current.successors())
        .map(|status| StatusOption {
            value: status.as_str().to_string(),
            label: status.label().to_string(),
        })
        .collect()
}

/// Display label for a raw status value, falling back to the value itself.
pub fn status_label(kind: EntityKind, value: &str) -> String {
    AnyStatus::parse(kind, value)
        .map(|status| status.label().to_string())
        .unwrap_or_else(|| value.to_string())
}
