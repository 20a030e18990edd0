//! Store and provider wiring.

use std::sync::Arc;

use fieldwork_infra::{
    AppConfig, InMemoryWorkOrderStore, OrchestratorConfig, PostgresWorkOrderStore,
    StaticWeatherProvider, StoreError, TaskOrchestrator, UncheckedEmployeeDirectory,
    WorkOrderStore,
};

/// Shared state handed to every handler.
pub struct AppServices {
    pub orchestrator: TaskOrchestrator<dyn WorkOrderStore>,
    /// Latest station reading; fed through `PUT /weather/current`.
    pub weather: Arc<StaticWeatherProvider>,
}

impl AppServices {
    pub fn new(store: Arc<dyn WorkOrderStore>, config: OrchestratorConfig) -> Self {
        let weather = Arc::new(StaticWeatherProvider::unavailable());
        let orchestrator = TaskOrchestrator::new(
            store,
            weather.clone(),
            Arc::new(UncheckedEmployeeDirectory),
            config,
        );
        Self {
            orchestrator,
            weather,
        }
    }

    /// Services over a fresh in-memory store.
    pub fn in_memory(config: OrchestratorConfig) -> Self {
        Self::new(Arc::new(InMemoryWorkOrderStore::new()), config)
    }
}

/// Postgres when `DATABASE_URL` is set (schema applied on startup), in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StoreError> {
    let store: Arc<dyn WorkOrderStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresWorkOrderStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            tracing::info!(max_connections = config.db_max_connections, "using postgres store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryWorkOrderStore::new())
        }
    };
    Ok(AppServices::new(store, config.orchestrator))
}
