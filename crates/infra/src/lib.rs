//! Infrastructure layer: transactional stores, external collaborators, config,
//! and the task orchestrator that ties the domain crates together.

pub mod config;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod store;


pub use config::{AppConfig, ConfigError, OrchestratorConfig, WeatherGateMode};
pub use orchestrator::{
    CreateTaskRequest, DependencyOutcome, OrchestratorError, OrchestratorResult, Readiness,
    TaskDetails, TaskOrchestrator, WeatherReport,
};
pub use providers::{
    EmployeeDirectory, InMemoryEmployeeDirectory, ProviderError, StaticWeatherProvider,
    UncheckedEmployeeDirectory, WeatherProvider,
};
pub use query::{Page, Pagination, TaskQuery};
pub use store::{
    InMemoryWorkOrderStore, PostgresWorkOrderStore, StoreError, WorkOrderStore, WorkOrderTx,
};
