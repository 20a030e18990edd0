use std::sync::Arc;

use anyhow::Context;

use fieldwork_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fieldwork_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = fieldwork_api::app::services::build_services(&config)
        .await
        .context("failed to initialise the work-order store")?;

    let app = fieldwork_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        weather_gate = ?config.orchestrator.weather_gate,
        "listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
