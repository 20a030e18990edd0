//! Process configuration read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `FIELDWORK_BIND_ADDR` | `0.0.0.0:8080` |
//! | `DATABASE_URL` | unset: in-memory store |
//! | `FIELDWORK_DB_MAX_CONNECTIONS` | `5` |
//! | `FIELDWORK_DEFAULT_PAGE_SIZE` | `20` |
//! | `FIELDWORK_MAX_PAGE_SIZE` | `100` |
//! | `FIELDWORK_WEATHER_GATE` | `advisory` (or `enforce`) |

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BIND_ADDR_ENV_VAR: &str = "FIELDWORK_BIND_ADDR";
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS_ENV_VAR: &str = "FIELDWORK_DB_MAX_CONNECTIONS";
pub const DEFAULT_PAGE_SIZE_ENV_VAR: &str = "FIELDWORK_DEFAULT_PAGE_SIZE";
pub const MAX_PAGE_SIZE_ENV_VAR: &str = "FIELDWORK_MAX_PAGE_SIZE";
pub const WEATHER_GATE_ENV_VAR: &str = "FIELDWORK_WEATHER_GATE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// How an unfavorable weather verdict affects status transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherGateMode {
    /// Verdicts are reported, never enforced.
    #[default]
    Advisory,
    /// Moving a weather-dependent task into EN_COURS requires a favorable verdict.
    Enforce,
}

impl core::str::FromStr for WeatherGateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(WeatherGateMode::Advisory),
            "enforce" => Ok(WeatherGateMode::Enforce),
            _ => Err("expected 'advisory' or 'enforce'".to_string()),
        }
    }
}

/// Settings the orchestrator itself depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub weather_gate: WeatherGateMode,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            weather_gate: WeatherGateMode::Advisory,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub orchestrator: OrchestratorConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(BIND_ADDR_ENV_VAR, read(BIND_ADDR_ENV_VAR), || {
            SocketAddr::from(([0, 0, 0, 0], 8080))
        })?;
        let db_max_connections =
            parse_or(DB_MAX_CONNECTIONS_ENV_VAR, read(DB_MAX_CONNECTIONS_ENV_VAR), || 5)?;
        let default_page_size =
            parse_or(DEFAULT_PAGE_SIZE_ENV_VAR, read(DEFAULT_PAGE_SIZE_ENV_VAR), || 20u32)?;
        let max_page_size =
            parse_or(MAX_PAGE_SIZE_ENV_VAR, read(MAX_PAGE_SIZE_ENV_VAR), || 100u32)?;
        let weather_gate = parse_or(WEATHER_GATE_ENV_VAR, read(WEATHER_GATE_ENV_VAR), || {
            WeatherGateMode::Advisory
        })?;

        if db_max_connections == 0 {
            return Err(invalid(DB_MAX_CONNECTIONS_ENV_VAR, "0", "must be at least 1"));
        }
        if default_page_size == 0 || max_page_size == 0 {
            return Err(invalid(
                if default_page_size == 0 {
                    DEFAULT_PAGE_SIZE_ENV_VAR
                } else {
                    MAX_PAGE_SIZE_ENV_VAR
                },
                "0",
                "page sizes must be at least 1",
            ));
        }
        if default_page_size > max_page_size {
            return Err(invalid(
                DEFAULT_PAGE_SIZE_ENV_VAR,
                &default_page_size.to_string(),
                &format!("cannot exceed {MAX_PAGE_SIZE_ENV_VAR} ({max_page_size})"),
            ));
        }

        Ok(Self {
            bind_addr,
            database_url: read(DATABASE_URL_ENV_VAR),
            db_max_connections,
            orchestrator: OrchestratorConfig {
                weather_gate,
                default_page_size,
                max_page_size,
            },
        })
    }
}

fn parse_or<T>(
    var: &'static str,
    raw: Option<String>,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        None => Ok(default()),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &value, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.db_max_connections, 5);
        assert_eq!(cfg.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let cfg = config(&[
            (BIND_ADDR_ENV_VAR, "127.0.0.1:9000"),
            (DATABASE_URL_ENV_VAR, "postgres://localhost/fieldwork"),
            (WEATHER_GATE_ENV_VAR, "Enforce"),
            (MAX_PAGE_SIZE_ENV_VAR, "50"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/fieldwork"));
        assert_eq!(cfg.orchestrator.weather_gate, WeatherGateMode::Enforce);
        assert_eq!(cfg.orchestrator.max_page_size, 50);
    }

    #[test]
    fn malformed_values_are_typed_errors() {
        let err = config(&[(DB_MAX_CONNECTIONS_ENV_VAR, "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == DB_MAX_CONNECTIONS_ENV_VAR));

        let err = config(&[(WEATHER_GATE_ENV_VAR, "sometimes")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == WEATHER_GATE_ENV_VAR));
    }

    #[test]
    fn default_page_size_cannot_exceed_max() {
        let err = config(&[(DEFAULT_PAGE_SIZE_ENV_VAR, "200")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == DEFAULT_PAGE_SIZE_ENV_VAR));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        assert_eq!(config(&[(DATABASE_URL_ENV_VAR, "  ")]).unwrap().database_url, None);
    }
}
