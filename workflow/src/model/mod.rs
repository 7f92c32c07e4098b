//! Record model for incidents and changes.
//!
//! Statuses and priorities are closed enums so every lookup (labels,
//! successors, SLA tiers) is an exhaustive `match`. Raw strings coming from
//! the host are parsed at the edge with [`std::str::FromStr`].

pub mod change;
pub mod incident;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub use change::{Change, ChangePatch, ChangeStatus};
pub use incident::{Incident, IncidentPatch, IncidentStatus, Priority};

/// Which entity a status string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Incident,
    Change,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Incident, EntityKind::Change];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Change => "change",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incident" | "incidents" => Ok(Self::Incident),
            "change" | "changes" => Ok(Self::Change),
            other => Err(UnknownValue::new("entity kind", other)),
        }
    }
}

/// A raw value that does not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: String,
}

impl UnknownValue {
    pub(crate) fn new(what: &'static str, value: impl Into<String>) -> Self {
        Self {
            what,
            value: value.into(),
        }
    }
}

/// Parse a host timestamp.
///
/// Accepts RFC 3339 (`2024-05-01T09:30:00Z`), a naive
/// `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` taken as UTC, and integer
/// milliseconds since the Unix epoch.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

/// Timestamp shapes seen in stored records.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
    Other(serde::de::IgnoredAny),
}

/// Deserialize an optional timestamp, mapping anything unparseable to `None`.
///
/// An incident whose creation instant cannot be read is still loaded; the
/// SLA calculator reports it as unclassifiable instead of the whole record
/// set failing to load.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawTimestamp::Text(text)) => parse_timestamp(&text),
        Some(RawTimestamp::Millis(millis)) => Utc.timestamp_millis_opt(millis).single(),
        Some(RawTimestamp::Other(_)) | None => None,
    })
}

/// Deserialize a patch field where a present `null` means "clear".
///
/// Only called when the key exists (pair with `#[serde(default)]`), so
/// `null` becomes `Some(None)` and a missing key stays `None`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
