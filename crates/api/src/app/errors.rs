use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fieldwork_infra::OrchestratorError;

pub fn orchestrator_error_to_response(err: OrchestratorError) -> axum::response::Response {
    let message = err.to_string();
    if err.is_internal() {
        tracing::error!(error = %message, "request failed with an internal error");
    }
    match err {
        OrchestratorError::TaskNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "task_not_found", message)
        }
        OrchestratorError::ResourceNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "resource_not_found", message)
        }
        OrchestratorError::DependencyNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "dependency_not_found", message)
        }
        OrchestratorError::EmployeeNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "employee_not_found", message)
        }
        OrchestratorError::AssociationNotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, "association_not_found", message)
        }
        OrchestratorError::InsufficientStock { .. } => {
            json_error(StatusCode::BAD_REQUEST, "insufficient_stock", message)
        }
        OrchestratorError::CircularDependency { .. } => {
            json_error(StatusCode::BAD_REQUEST, "circular_dependency", message)
        }
        OrchestratorError::UsageExceedsRequired { .. } => {
            json_error(StatusCode::BAD_REQUEST, "usage_exceeds_required", message)
        }
        OrchestratorError::InvalidTransition { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_transition", message)
        }
        OrchestratorError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        OrchestratorError::WeatherUnfavorable { violated } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "weather_unfavorable",
                "message": message,
                "violated_constraints": violated,
            })),
        )
            .into_response(),
        OrchestratorError::Concurrency(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        OrchestratorError::Provider(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "weather_unavailable", message)
        }
        OrchestratorError::Internal(_) | OrchestratorError::Store(_) => {
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment, answering 400 `invalid_id` on failure.
pub fn parse_id<T>(raw: &str, what: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr,
{
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldwork_core::{ResourceId, TaskId};
    use fieldwork_infra::{ProviderError, StoreError};

    #[test]
    fn status_codes_follow_error_class() {
        let cases = [
            (OrchestratorError::TaskNotFound(TaskId::new()), StatusCode::NOT_FOUND),
            (
                OrchestratorError::InsufficientStock {
                    resource_id: ResourceId::new(),
                    requested: 5,
                    available: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::WeatherUnfavorable { violated: vec![] },
                StatusCode::CONFLICT,
            ),
            (OrchestratorError::Concurrency("stale".into()), StatusCode::CONFLICT),
            (
                OrchestratorError::Provider(ProviderError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::Store(StoreError::Backend("io".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(orchestrator_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn only_internal_errors_answer_5xx() {
        let errors = [
            OrchestratorError::TaskNotFound(TaskId::new()),
            OrchestratorError::Validation("bad".into()),
            OrchestratorError::Concurrency("stale".into()),
            OrchestratorError::Internal("broken".into()),
            OrchestratorError::Store(StoreError::Backend("io".into())),
            OrchestratorError::Provider(ProviderError::Unavailable("down".into())),
        ];
        for err in errors {
            let internal = err.is_internal();
            let status = orchestrator_error_to_response(err).status();
            assert_eq!(internal, status.is_server_error(), "{status}");
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id::<TaskId>("not-a-uuid", "task").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<TaskId>(&TaskId::new().to_string(), "task").is_ok());
    }
}
