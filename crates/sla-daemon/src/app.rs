//! Command execution for the daemon binary.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use workflow::{
    available_transitions, classify, EngineConfig, EntityKind, EscalationScheduler, RecordStore,
    SlaSummary, TickOutcome, TracingAudit, TracingNotifier, WorkflowService,
};

use crate::cli::{Cli, Command};
use crate::file_store::JsonFileStore;

/// Defaults, then the TOML file if given, then `SLA_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides())
}

/// What `tick` prints.
#[derive(Debug, Serialize)]
pub struct TickOutput {
    pub tick: TickOutcome,
    /// SLA standing of the active incidents after the sweep.
    pub sla: SlaSummary,
}

/// Run one CLI command, writing its output to `out`.
pub async fn execute(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(JsonFileStore::new(&cli.store));

    match &cli.command {
        Command::Run => run(config, store).await,
        Command::Tick => {
            let output = tick(config, store).await?;
            write_json(out, &output)
        }
        Command::Transitions { kind, status } => {
            for option in available_transitions(*kind, status) {
                writeln!(out, "{}\t{}", option.value, option.label)?;
            }
            Ok(())
        }
        Command::SetStatus { kind, id, status } => {
            let service = WorkflowService::new(store);
            match kind {
                EntityKind::Incident => {
                    let incident = service.set_incident_status(id, status).await?;
                    write_json(out, &incident)
                }
                EntityKind::Change => {
                    let change = service.set_change_status(id, status).await?;
                    write_json(out, &change)
                }
            }
        }
        Command::Sla { id } => {
            let assessment = WorkflowService::new(store).incident_sla(id).await?;
            write_json(out, &assessment)
        }
    }
}

/// Sweep once, then summarize SLA standing across the active incidents.
pub async fn tick(config: EngineConfig, store: Arc<JsonFileStore>) -> Result<TickOutput> {
    let scheduler = EscalationScheduler::new(
        config,
        store.clone(),
        Arc::new(TracingNotifier),
        Arc::new(TracingAudit),
    );
    let outcome = scheduler.tick().await;

    let now = chrono::Utc::now();
    let assessments: Vec<_> = store
        .list_active_incidents()
        .await
        .with_context(|| format!("Failed to read {}", store.path().display()))?
        .iter()
        .map(|incident| classify(incident, now))
        .collect();

    Ok(TickOutput {
        tick: outcome,
        sla: SlaSummary::from_assessments(&assessments),
    })
}

async fn run(config: EngineConfig, store: Arc<JsonFileStore>) -> Result<()> {
    info!(
        store = %store.path().display(),
        threshold_hours = config.escalation_threshold_hours,
        interval_secs = config.tick_interval().as_secs(),
        auto_assignee = config.auto_assignee().unwrap_or("-"),
        "SLA daemon starting"
    );

    let mut scheduler = EscalationScheduler::new(
        config,
        store,
        Arc::new(TracingNotifier),
        Arc::new(TracingAudit),
    );
    if !scheduler.start() {
        bail!("Escalation scheduler failed to start");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight sweep");
    scheduler.shutdown().await;
    Ok(())
}

fn write_json(out: &mut dyn Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
