//! JSON file-backed record store.
//!
//! The file holds one object with `incidents` and `changes` arrays:
//!
//! ```json
//! {
//!   "incidents": [{ "id": "INC-1", "status": "open", "priority": "high", "createdAt": "..." }],
//!   "changes":   [{ "id": "CHG-1", "status": "draft", "type": "standard" }]
//! }
//! ```
//!
//! Records are kept as raw JSON objects. Writes only touch the fields the
//! engine owns, so host fields the engine does not model (descriptions,
//! custom attributes, unreadable timestamps) survive a round trip. Every
//! write goes to a temp file that is renamed over the original.
//!
//! Every read-modify-write holds an exclusive advisory lock on a sibling
//! `.json.lock` file, so writers are serialized across processes and store
//! handles. Readers take no lock; the rename keeps each read whole.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use workflow::store::StoreResult;
use workflow::{
    apply_escalation, Change, ChangePatch, EscalationWrite, Incident, IncidentPatch, RecordStore,
    StoreError,
};

use crate::lock::FileLock;

const INCIDENTS: &str = "incidents";
const CHANGES: &str = "changes";

/// How long a write waits for another writer to release the file.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Incident fields the engine writes, with the camelCase spelling hosts may use.
const INCIDENT_FIELDS: &[(&str, Option<&str>)] = &[
    ("status", None),
    ("priority", None),
    ("assignee", None),
    ("resolved_at", Some("resolvedAt")),
    ("escalated", None),
    ("escalated_at", Some("escalatedAt")),
];

const CHANGE_FIELDS: &[(&str, Option<&str>)] = &[("status", None)];

#[derive(Debug, Default)]
struct Document(Map<String, Value>);

impl Document {
    fn parse(raw: &str, path: &Path) -> StoreResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(root)) => Ok(Self(root)),
            Ok(_) => Err(StoreError::Serialization(format!(
                "{}: top level must be an object",
                path.display()
            ))),
            Err(e) => Err(StoreError::Serialization(format!("{}: {e}", path.display()))),
        }
    }

    fn section(&self, key: &str) -> StoreResult<&[Value]> {
        match self.0.get(key) {
            None => Ok(&[][..]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(not_an_array(key)),
        }
    }

    fn section_mut(&mut self, key: &str) -> StoreResult<&mut Vec<Value>> {
        match self
            .0
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => Ok(items),
            _ => Err(not_an_array(key)),
        }
    }
}

fn not_an_array(key: &str) -> StoreError {
    StoreError::Serialization(format!("'{key}' must be an array"))
}

fn record_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

fn position(items: &[Value], id: &str) -> Option<usize> {
    items.iter().position(|item| record_id(item) == Some(id))
}

fn decode<T: DeserializeOwned>(item: &Value, id: &str) -> StoreResult<T> {
    serde_json::from_value(item.clone())
        .map_err(|e| StoreError::Serialization(format!("record {id}: {e}")))
}

/// Decode every readable record of a section, skipping the rest.
fn decode_all<T: DeserializeOwned>(items: &[Value], section: &str) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    section,
                    index,
                    id = record_id(item).unwrap_or("-"),
                    error = %e,
                    "Skipping unreadable record"
                );
                None
            }
        })
        .collect()
}

/// Overwrite the engine-owned fields of `target` with those of `record`.
fn merge(
    target: &mut Value,
    record: &impl Serialize,
    owned: &[(&str, Option<&str>)],
) -> StoreResult<()> {
    let Value::Object(fields) =
        serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))?
    else {
        return Err(StoreError::Serialization("record is not an object".into()));
    };
    let Some(target) = target.as_object_mut() else {
        return Err(StoreError::Serialization("stored record is not an object".into()));
    };

    for (key, alias) in owned {
        target.remove(*key);
        if let Some(alias) = alias {
            target.remove(*alias);
        }
        if let Some(value) = fields.get(*key) {
            target.insert((*key).to_string(), value.clone());
        }
    }
    Ok(())
}

/// Record store over a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    lock_timeout: Duration,
}

/// Held for the whole of one read-modify-write.
struct WriteGuard<'a> {
    _file: FileLock,
    _local: MutexGuard<'a, ()>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file reads as empty and is
    /// created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Give up on a write after waiting `timeout` for another writer.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The advisory lock file guarding writes.
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace an incident.
    pub async fn upsert_incident(&self, incident: &Incident) -> StoreResult<()> {
        let _guard = self.lock().await?;
        let mut doc = self.load().await?;
        upsert(doc.section_mut(INCIDENTS)?, &incident.id, incident)?;
        self.save(&doc).await
    }

    /// Insert or replace a change.
    pub async fn upsert_change(&self, change: &Change) -> StoreResult<()> {
        let _guard = self.lock().await?;
        let mut doc = self.load().await?;
        upsert(doc.section_mut(CHANGES)?, &change.id, change)?;
        self.save(&doc).await
    }

    /// Every readable incident, including resolved and closed ones.
    pub async fn all_incidents(&self) -> StoreResult<Vec<Incident>> {
        let doc = self.load().await?;
        Ok(decode_all(doc.section(INCIDENTS)?, INCIDENTS))
    }

    async fn lock(&self) -> StoreResult<WriteGuard<'_>> {
        let local = self.write_lock.lock().await;
        let file = FileLock::acquire(&self.lock_path(), self.lock_timeout).await?;
        Ok(WriteGuard {
            _file: file,
            _local: local,
        })
    }

    async fn load(&self) -> StoreResult<Document> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Document::parse(&raw, &self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Record file missing, treating as empty");
                Ok(Document::default())
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Write to a temp file, then rename over the original.
    async fn save(&self, doc: &Document) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&doc.0)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), "Record file saved");
        Ok(())
    }
}

fn upsert(items: &mut Vec<Value>, id: &str, record: &impl Serialize) -> StoreResult<()> {
    let value =
        serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
    match position(items, id) {
        Some(index) => items[index] = value,
        None => items.push(value),
    }
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn list_active_incidents(&self) -> StoreResult<Vec<Incident>> {
        let mut incidents = self.all_incidents().await?;
        incidents.retain(Incident::is_active);
        Ok(incidents)
    }

    async fn get_incident(&self, id: &str) -> StoreResult<Incident> {
        let doc = self.load().await?;
        let items = doc.section(INCIDENTS)?;
        let index = position(items, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode(&items[index], id)
    }

    async fn update_incident(&self, id: &str, patch: IncidentPatch) -> StoreResult<Incident> {
        let _guard = self.lock().await?;
        let mut doc = self.load().await?;
        let items = doc.section_mut(INCIDENTS)?;
        let index = position(items, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut incident: Incident = decode(&items[index], id)?;
        patch.apply(&mut incident);
        merge(&mut items[index], &incident, INCIDENT_FIELDS)?;

        self.save(&doc).await?;
        Ok(incident)
    }

    async fn escalate_incident(
        &self,
        id: &str,
        escalated_at: DateTime<Utc>,
        assignee: Option<&str>,
    ) -> StoreResult<EscalationWrite> {
        let _guard = self.lock().await?;
        let mut doc = self.load().await?;
        let items = doc.section_mut(INCIDENTS)?;
        let index = position(items, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut incident: Incident = decode(&items[index], id)?;
        let write = apply_escalation(&mut incident, escalated_at, assignee);
        if !matches!(write, EscalationWrite::Applied(_)) {
            return Ok(write);
        }
        merge(&mut items[index], &incident, INCIDENT_FIELDS)?;

        self.save(&doc).await?;
        Ok(write)
    }

    async fn list_changes(&self) -> StoreResult<Vec<Change>> {
        let doc = self.load().await?;
        Ok(decode_all(doc.section(CHANGES)?, CHANGES))
    }

    async fn get_change(&self, id: &str) -> StoreResult<Change> {
        let doc = self.load().await?;
        let items = doc.section(CHANGES)?;
        let index = position(items, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode(&items[index], id)
    }

    async fn update_change(&self, id: &str, patch: ChangePatch) -> StoreResult<Change> {
        let _guard = self.lock().await?;
        let mut doc = self.load().await?;
        let items = doc.section_mut(CHANGES)?;
        let index = position(items, id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut change: Change = decode(&items[index], id)?;
        patch.apply(&mut change);
        merge(&mut items[index], &change, CHANGE_FIELDS)?;

        self.save(&doc).await?;
        Ok(change)
    }
}
