use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use fieldwork_core::ResourceId;
use fieldwork_resources::NewResource;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_resource).get(list_resources))
        .route("/:id", get(get_resource))
        .route("/:id/adjust", post(adjust_resource))
        .route("/:id/condition", put(set_condition))
}

pub async fn register_resource(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewResource>,
) -> axum::response::Response {
    match services.orchestrator.register_resource(body).await {
        Ok(resource) => (StatusCode::CREATED, Json(resource)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_resources(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PageQuery>,
) -> axum::response::Response {
    let pagination = services.orchestrator.pagination(query.page, query.page_size);
    match services.orchestrator.list_resources(pagination).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn get_resource(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let resource_id: ResourceId = match errors::parse_id(&id, "resource") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orchestrator.get_resource(resource_id).await {
        Ok(resource) => (StatusCode::OK, Json(resource)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn adjust_resource(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustResourceRequest>,
) -> axum::response::Response {
    let resource_id: ResourceId = match errors::parse_id(&id, "resource") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .orchestrator
        .adjust_resource_total(resource_id, body.delta)
        .await
    {
        Ok(resource) => (StatusCode::OK, Json(resource)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn set_condition(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetConditionRequest>,
) -> axum::response::Response {
    let resource_id: ResourceId = match errors::parse_id(&id, "resource") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .orchestrator
        .set_resource_condition(resource_id, body.condition)
        .await
    {
        Ok(resource) => (StatusCode::OK, Json(resource)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
