//! Escalation: the periodic sweep over open incidents.
//!
//! ```text
//! every tick_interval (and once on start)
//!     │
//!     ├─ SLA pass: classify all active incidents
//!     │     ├─ breach  → one batched sla_violation event
//!     │     └─ warning → one batched sla_warning event
//!     │
//!     └─ Escalation pass: open, not yet escalated, older than threshold
//!           └─ guarded write (escalated=true, escalated_at, assignee?)
//!                 └─ winner only: escalation event + audit entry
//! ```
//!
//! The persisted `escalated` flag is the at-most-once gate: replays,
//! restarts and racing scheduler instances never escalate twice.

pub mod policy;
pub mod report;
pub mod scheduler;

pub use policy::EscalationPolicy;
pub use report::{FailureStage, TickFailure, TickOutcome, TickReport};
pub use scheduler::EscalationScheduler;
