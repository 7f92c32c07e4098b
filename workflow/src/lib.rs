//! Workflow & SLA Engine
//!
//! This library provides the decision and scheduling core of an ITSM
//! service desk:
//! - **Transition validation**: legal status moves for incidents and changes
//! - **SLA classification**: resolution deadlines and ok / warning / breach bands
//! - **Escalation scheduling**: a periodic sweep that batches SLA alerts and
//!   escalates stale open incidents exactly once
//!
//! Records live in a host-supplied [`RecordStore`]; events go to a
//! [`NotificationSink`] and an [`AuditSink`]. All three are injected, with
//! in-memory and no-op implementations provided here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workflow::{EngineConfig, EscalationScheduler, InMemoryStore, TracingAudit, TracingNotifier};
//!
//! let store = InMemoryStore::new().shared();
//! let mut scheduler = EscalationScheduler::new(
//!     EngineConfig::default().with_env_overrides(),
//!     store,
//!     Arc::new(TracingNotifier),
//!     Arc::new(TracingAudit),
//! );
//! scheduler.start();
//! // ...
//! scheduler.shutdown().await;
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod escalation;
pub mod model;
pub mod notify;
pub mod service;
pub mod sla;
pub mod store;
pub mod transition;

// Re-export model types
pub use model::{
    parse_timestamp, Change, ChangePatch, ChangeStatus, EntityKind, Incident, IncidentPatch,
    IncidentStatus, Priority, UnknownValue,
};

// Re-export validator and SLA types
pub use sla::{classify, format_duration, SlaAssessment, SlaStatus, SlaSummary, SlaTier};
pub use transition::{
    available_transitions, is_valid_transition, status_label, StatusOption, TransitionCheck,
};

// Re-export escalation types
pub use escalation::{
    EscalationPolicy, EscalationScheduler, FailureStage, TickFailure, TickOutcome, TickReport,
};

// Re-export collaborator types
pub use audit::{AuditEntry, AuditError, AuditSink, MemoryAuditLog, NoopAudit, TracingAudit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use notify::{
    BroadcastNotifier, MemoryNotifier, NoopNotifier, Notification, NotificationSink, NotifyError,
    TracingNotifier,
};
pub use service::{WorkflowError, WorkflowService};
pub use store::{
    apply_escalation, EscalationWrite, InMemoryStore, RecordStore, SharedRecordStore, StoreError,
};
