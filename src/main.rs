//! trustguard - trust and moderation service.

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};
use trustguard::config::{Config, validate};
use trustguard::http::{AppState, bind_and_serve};
use trustguard::moderation::DisabledRoleGranter;
use trustguard::{metrics, telemetry};

const ALLOW_INSECURE_VAR: &str = "TRUSTGUARD_ALLOW_INSECURE_SECRETS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load_with_env(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path))?;

    telemetry::init_tracing(config.server.json_logs);

    let allow_insecure = std::env::var(ALLOW_INSECURE_VAR).is_ok();
    if let Err(errors) = validate(&config, allow_insecure) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        error!("Set strong secrets with: openssl rand -hex 32");
        anyhow::bail!("refusing to start: {} configuration error(s)", errors.len());
    }
    if allow_insecure {
        warn!("{} is set; weak secrets are accepted", ALLOW_INSECURE_VAR);
    }

    metrics::init();

    let state = AppState::build(&config, Arc::new(DisabledRoleGranter))
        .await
        .context("failed to initialize services")?;

    info!(
        listen = %config.server.listen,
        database = %config.database.path,
        "Starting trustguard"
    );

    bind_and_serve(config.server.listen, Arc::new(state), shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
