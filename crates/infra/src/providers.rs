//! External collaborators the orchestrator consults read-only.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use fieldwork_core::EmployeeId;
use fieldwork_tasks::WeatherConditions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_conditions(&self) -> Result<WeatherConditions, ProviderError>;
}

/// Existence check for responsible/author references. No deeper validation.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn exists(&self, employee_id: EmployeeId) -> Result<bool, ProviderError>;
}

/// Weather provider returning whatever conditions were last set.
#[derive(Debug, Default)]
pub struct StaticWeatherProvider {
    conditions: RwLock<Option<WeatherConditions>>,
}

impl StaticWeatherProvider {
    pub fn new(conditions: WeatherConditions) -> Self {
        Self {
            conditions: RwLock::new(Some(conditions)),
        }
    }

    /// A provider with no reading yet; every query fails `Unavailable`.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, conditions: WeatherConditions) -> Result<(), ProviderError> {
        let mut guard = self
            .conditions
            .write()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".to_string()))?;
        *guard = Some(conditions);
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for StaticWeatherProvider {
    async fn current_conditions(&self) -> Result<WeatherConditions, ProviderError> {
        let guard = self
            .conditions
            .read()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".to_string()))?;
        guard.ok_or_else(|| ProviderError::Unavailable("no weather reading available".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEmployeeDirectory {
    employees: RwLock<HashSet<EmployeeId>>,
}

impl InMemoryEmployeeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_employees(ids: impl IntoIterator<Item = EmployeeId>) -> Self {
        Self {
            employees: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub fn add(&self, id: EmployeeId) -> Result<(), ProviderError> {
        self.employees
            .write()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".to_string()))?
            .insert(id);
        Ok(())
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryEmployeeDirectory {
    async fn exists(&self, employee_id: EmployeeId) -> Result<bool, ProviderError> {
        let employees = self
            .employees
            .read()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".to_string()))?;
        Ok(employees.contains(&employee_id))
    }
}

/// Directory that accepts every reference, for deployments where the HR
/// system is not wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UncheckedEmployeeDirectory;

#[async_trait]
impl EmployeeDirectory for UncheckedEmployeeDirectory {
    async fn exists(&self, _employee_id: EmployeeId) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_reports_latest_reading() {
        let provider = StaticWeatherProvider::unavailable();
        assert!(provider.current_conditions().await.is_err());

        let reading = WeatherConditions {
            temperature: 12.5,
            wind_speed: 8.0,
            precipitation: 0.0,
            humidity: 70.0,
        };
        provider.set(reading).unwrap();
        assert_eq!(provider.current_conditions().await.unwrap(), reading);
    }

    #[tokio::test]
    async fn directory_only_knows_registered_employees() {
        let known = EmployeeId::new();
        let directory = InMemoryEmployeeDirectory::with_employees([known]);
        assert!(directory.exists(known).await.unwrap());
        assert!(!directory.exists(EmployeeId::new()).await.unwrap());
        assert!(UncheckedEmployeeDirectory.exists(EmployeeId::new()).await.unwrap());
    }
}
