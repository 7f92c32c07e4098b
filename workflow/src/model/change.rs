//! Change request record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::UnknownValue;

/// Change request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Draft,
    Pending,
    Approved,
    InProgress,
    Completed,
    Rejected,
}

impl ChangeStatus {
    pub const ALL: [ChangeStatus; 6] = [
        ChangeStatus::Draft,
        ChangeStatus::Pending,
        ChangeStatus::Approved,
        ChangeStatus::InProgress,
        ChangeStatus::Completed,
        ChangeStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Pending => "Pending Approval",
            Self::Approved => "Approved",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Rejected => "Rejected",
        }
    }

    /// Legal targets from this status.
    ///
    /// ```text
    /// draft       -> pending
    /// pending     -> approved, rejected
    /// approved    -> in_progress
    /// in_progress -> completed
    /// completed, rejected: terminal
    /// ```
    pub fn successors(self) -> &'static [ChangeStatus] {
        use ChangeStatus::*;
        match self {
            Draft => &[Pending],
            Pending => &[Approved, Rejected],
            Approved => &[InProgress],
            InProgress => &[Completed],
            Completed | Rejected => &[],
        }
    }

    pub fn can_transition_to(self, to: ChangeStatus) -> bool {
        self == to || self.successors().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue::new("change status", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: ChangeStatus,
    /// Free-form change type (`standard`, `normal`, `emergency`, ...).
    #[serde(rename = "type", default)]
    pub change_type: String,
}

impl Change {
    pub fn new(id: impl Into<String>, change_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            status: ChangeStatus::Draft,
            change_type: change_type.into(),
        }
    }

    pub fn with_status(mut self, status: ChangeStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial update for [`Change`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ChangeStatus>,
}

impl ChangePatch {
    pub fn status(status: ChangeStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn apply(&self, change: &mut Change) {
        if let Some(status) = self.status {
            change.status = status;
        }
    }
}
