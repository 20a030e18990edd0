//! Weather gate: a pure predicate over a task's declared environmental bounds.
//!
//! The verdict is advisory. Whether an unfavorable verdict blocks a transition is
//! decided by the caller.

use serde::{Deserialize, Serialize};

use fieldwork_core::{DomainError, DomainResult};

use crate::task::Task;

/// Bounds a weather-dependent task declares. Unset bounds are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConstraints {
    /// °C
    pub min_temperature: Option<f64>,
    /// °C
    pub max_temperature: Option<f64>,
    /// km/h
    pub max_wind_speed: Option<f64>,
    /// mm
    pub max_precipitation: Option<f64>,
}

impl WeatherConstraints {
    pub fn validate(&self) -> DomainResult<()> {
        let all = [
            self.min_temperature,
            self.max_temperature,
            self.max_wind_speed,
            self.max_precipitation,
        ];
        if all.iter().flatten().any(|v| !v.is_finite()) {
            return Err(DomainError::validation("weather bounds must be finite numbers"));
        }
        if let (Some(min), Some(max)) = (self.min_temperature, self.max_temperature) {
            if min > max {
                return Err(DomainError::validation(
                    "min_temperature cannot exceed max_temperature",
                ));
            }
        }
        if self.max_wind_speed.is_some_and(|v| v < 0.0)
            || self.max_precipitation.is_some_and(|v| v < 0.0)
        {
            return Err(DomainError::validation(
                "wind speed and precipitation bounds cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Current conditions as reported by a weather provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherConditions {
    pub temperature: f64,
    pub wind_speed: f64,
    pub precipitation: f64,
    pub humidity: f64,
}

/// One bound the current conditions break.
///
/// On the wire: `{"kind": "temperature", "constraint": "min_temperature",
/// "bound": 20.0, "actual": 15.0}`. `kind` names the measurement and is
/// derived from `constraint` when reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "ViolationRecord", from = "ViolationRecord")]
pub enum ViolatedConstraint {
    MinTemperature { bound: f64, actual: f64 },
    MaxTemperature { bound: f64, actual: f64 },
    MaxWindSpeed { bound: f64, actual: f64 },
    MaxPrecipitation { bound: f64, actual: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BoundName {
    MinTemperature,
    MaxTemperature,
    MaxWindSpeed,
    MaxPrecipitation,
}

#[derive(Serialize, Deserialize)]
struct ViolationRecord {
    #[serde(default, skip_deserializing)]
    kind: String,
    constraint: BoundName,
    bound: f64,
    actual: f64,
}

impl From<ViolatedConstraint> for ViolationRecord {
    fn from(value: ViolatedConstraint) -> Self {
        let (constraint, bound, actual) = match value {
            ViolatedConstraint::MinTemperature { bound, actual } => {
                (BoundName::MinTemperature, bound, actual)
            }
            ViolatedConstraint::MaxTemperature { bound, actual } => {
                (BoundName::MaxTemperature, bound, actual)
            }
            ViolatedConstraint::MaxWindSpeed { bound, actual } => {
                (BoundName::MaxWindSpeed, bound, actual)
            }
            ViolatedConstraint::MaxPrecipitation { bound, actual } => {
                (BoundName::MaxPrecipitation, bound, actual)
            }
        };
        Self {
            kind: value.kind().to_string(),
            constraint,
            bound,
            actual,
        }
    }
}

impl From<ViolationRecord> for ViolatedConstraint {
    fn from(record: ViolationRecord) -> Self {
        let ViolationRecord {
            constraint,
            bound,
            actual,
            ..
        } = record;
        match constraint {
            BoundName::MinTemperature => ViolatedConstraint::MinTemperature { bound, actual },
            BoundName::MaxTemperature => ViolatedConstraint::MaxTemperature { bound, actual },
            BoundName::MaxWindSpeed => ViolatedConstraint::MaxWindSpeed { bound, actual },
            BoundName::MaxPrecipitation => ViolatedConstraint::MaxPrecipitation { bound, actual },
        }
    }
}

impl ViolatedConstraint {
    /// Which measurement is out of range: `temperature`, `wind_speed` or `precipitation`.
    pub fn kind(&self) -> &'static str {
        match self {
            ViolatedConstraint::MinTemperature { .. } | ViolatedConstraint::MaxTemperature { .. } => {
                "temperature"
            }
            ViolatedConstraint::MaxWindSpeed { .. } => "wind_speed",
            ViolatedConstraint::MaxPrecipitation { .. } => "precipitation",
        }
    }
}

impl core::fmt::Display for ViolatedConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ViolatedConstraint::MinTemperature { bound, actual } => {
                write!(f, "temperature {actual} below minimum {bound}")
            }
            ViolatedConstraint::MaxTemperature { bound, actual } => {
                write!(f, "temperature {actual} above maximum {bound}")
            }
            ViolatedConstraint::MaxWindSpeed { bound, actual } => {
                write!(f, "wind speed {actual} above maximum {bound}")
            }
            ViolatedConstraint::MaxPrecipitation { bound, actual } => {
                write!(f, "precipitation {actual} above maximum {bound}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherVerdict {
    pub favorable: bool,
    pub violated_constraints: Vec<ViolatedConstraint>,
}

impl WeatherVerdict {
    fn from_violations(violated_constraints: Vec<ViolatedConstraint>) -> Self {
        Self {
            favorable: violated_constraints.is_empty(),
            violated_constraints,
        }
    }
}

/// Check each declared bound independently.
pub fn evaluate(constraints: &WeatherConstraints, conditions: &WeatherConditions) -> WeatherVerdict {
    let mut violated = Vec::new();

    if let Some(bound) = constraints.min_temperature {
        if conditions.temperature < bound {
            violated.push(ViolatedConstraint::MinTemperature {
                bound,
                actual: conditions.temperature,
            });
        }
    }
    if let Some(bound) = constraints.max_temperature {
        if conditions.temperature > bound {
            violated.push(ViolatedConstraint::MaxTemperature {
                bound,
                actual: conditions.temperature,
            });
        }
    }
    if let Some(bound) = constraints.max_wind_speed {
        if conditions.wind_speed > bound {
            violated.push(ViolatedConstraint::MaxWindSpeed {
                bound,
                actual: conditions.wind_speed,
            });
        }
    }
    if let Some(bound) = constraints.max_precipitation {
        if conditions.precipitation > bound {
            violated.push(ViolatedConstraint::MaxPrecipitation {
                bound,
                actual: conditions.precipitation,
            });
        }
    }

    WeatherVerdict::from_violations(violated)
}

impl Task {
    /// Weather verdict for this task. Tasks that are not weather-dependent are
    /// always favorable, whatever bounds they carry.
    pub fn evaluate_weather(&self, conditions: &WeatherConditions) -> WeatherVerdict {
        if !self.record.weather_dependent {
            return WeatherVerdict::from_violations(Vec::new());
        }
        evaluate(&self.record.weather, conditions)
    }
}
