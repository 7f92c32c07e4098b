//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use workflow::EntityKind;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Incident / change workflow and SLA escalation daemon", long_about = None)]
pub struct Cli {
    /// TOML config file with an `[engine]` table (SLA_* env vars override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON record file holding `incidents` and `changes`
    #[arg(long, global = true, default_value = "records.json")]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the escalation scheduler until Ctrl-C
    Run,

    /// Run one sweep and print the report as JSON
    Tick,

    /// List the statuses reachable from a status
    Transitions {
        /// `incident` or `change`
        kind: EntityKind,
        status: String,
    },

    /// Validate and apply a status change
    SetStatus {
        /// `incident` or `change`
        kind: EntityKind,
        id: String,
        status: String,
    },

    /// Print the SLA assessment of an incident as JSON
    Sla { id: String },
}
