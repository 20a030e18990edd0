//! Station feed for the weather provider the orchestrator consults.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use fieldwork_infra::{OrchestratorError, WeatherProvider};
use fieldwork_tasks::WeatherConditions;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/current", get(current).put(record))
}

pub async fn current(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.weather.current_conditions().await {
        Ok(conditions) => (StatusCode::OK, Json(conditions)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(OrchestratorError::from(e)),
    }
}

/// Replace the latest reading.
pub async fn record(
    Extension(services): Extension<Arc<AppServices>>,
    Json(conditions): Json<WeatherConditions>,
) -> axum::response::Response {
    let readings = [
        conditions.temperature,
        conditions.wind_speed,
        conditions.precipitation,
        conditions.humidity,
    ];
    if readings.iter().any(|v| !v.is_finite()) {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "weather readings must be finite numbers",
        );
    }
    match services.weather.set(conditions) {
        Ok(()) => {
            tracing::info!(
                temperature = conditions.temperature,
                wind_speed = conditions.wind_speed,
                precipitation = conditions.precipitation,
                "weather reading recorded"
            );
            (StatusCode::OK, Json(conditions)).into_response()
        }
        Err(e) => errors::orchestrator_error_to_response(OrchestratorError::from(e)),
    }
}
