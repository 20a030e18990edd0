use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};

use fieldwork_core::{ResourceId, TaskId};
use fieldwork_infra::CreateTaskRequest;
use fieldwork_tasks::{NewDependency, TaskPatch};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_task))
        .route("/:id", get(get_task).patch(update_task).delete(delete_task))
        .route("/:id/comments", get(list_comments).post(add_comment))
        .route("/:id/reservations", get(list_reservations))
        .route("/:id/resources/:resource_id/usage", put(update_usage))
        .route("/:id/dependencies", post(add_dependency))
        .route("/:id/dependencies/:dependency_id", delete(remove_dependency))
        .route("/:id/dependents", get(list_dependents))
        .route("/:id/weather", get(evaluate_weather))
        .route("/:id/readiness", get(readiness))
}

fn ok<T: serde::Serialize>(status: StatusCode, body: T) -> axum::response::Response {
    (status, Json(body)).into_response()
}

pub async fn create_task(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateTaskRequest>,
) -> axum::response::Response {
    match services.orchestrator.create_task(body).await {
        Ok(details) => ok(StatusCode::CREATED, details),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.get_task(task_id).await {
        Ok(details) => ok(StatusCode::OK, details),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn update_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.update_task(task_id, patch).await {
        Ok(task) => ok(StatusCode::OK, task),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn delete_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.delete_task(task_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_comments(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.list_comments(task_id).await {
        Ok(comments) => ok(StatusCode::OK, comments),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn add_comment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddCommentRequest>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .orchestrator
        .add_comment(task_id, body.author_id, &body.text)
        .await
    {
        Ok(comment) => ok(StatusCode::CREATED, comment),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_reservations(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.list_reservations(task_id).await {
        Ok(reservations) => ok(StatusCode::OK, reservations),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn update_usage(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, resource_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateUsageRequest>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let resource_id: ResourceId = match errors::parse_id(&resource_id, "resource") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .orchestrator
        .update_resource_usage(task_id, resource_id, body.quantity_used)
        .await
    {
        Ok(reservation) => ok(StatusCode::OK, reservation),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn add_dependency(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<NewDependency>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.add_dependency(task_id, body).await {
        Ok(outcome) if outcome.created => ok(StatusCode::CREATED, outcome.edge),
        Ok(outcome) => ok(StatusCode::OK, outcome.edge),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn remove_dependency(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, dependency_id)): Path<(String, String)>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let dependency_id: TaskId = match errors::parse_id(&dependency_id, "dependency") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .orchestrator
        .remove_dependency(task_id, dependency_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_dependents(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.list_dependents(task_id).await {
        Ok(edges) => ok(StatusCode::OK, edges),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn evaluate_weather(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.evaluate_weather(task_id).await {
        Ok(report) => ok(StatusCode::OK, report),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn readiness(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id, "task") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.readiness(task_id).await {
        Ok(readiness) => ok(StatusCode::OK, readiness),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
