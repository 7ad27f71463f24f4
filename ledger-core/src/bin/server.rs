//! Tab ledger server binary

use anyhow::Context;
use tab_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // TAB_LEDGER_CONFIG points at a TOML file; otherwise read TAB_LEDGER_* vars
    let config = match std::env::var("TAB_LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("Failed to load config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "Starting tab ledger"
    );

    let ledger = Ledger::open(config).await.context("Failed to open ledger")?;
    let snapshot = ledger.snapshot().await?;
    tracing::info!(
        users = snapshot.users.len(),
        events = snapshot.events.len(),
        "Ledger opened successfully"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down tab ledger");
    match ledger.metrics().render() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Could not render metrics"),
    }
    ledger.shutdown().await?;
    Ok(())
}
