use anyhow::Context;
use clap::Parser;
use leadscope::commands::{execute, Cli};
use leadscope::{init_tracing, AppConfig, Dashboard};
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing();
    let config = AppConfig::from_env();
    let dashboard = Dashboard::from_config(&config).context("failed to build dashboard")?;

    let output = execute(&dashboard, &config, &cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Err(err) = dashboard.telemetry().flush() {
        warn!(?err, "failed to flush telemetry buffer");
    }
    Ok(())
}
