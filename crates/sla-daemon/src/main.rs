use anyhow::Result;
use clap::Parser;
use sla_daemon::app;
use sla_daemon::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    app::execute(&cli, &mut std::io::stdout()).await
}
