use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use fieldwork_core::ProjectId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:id/tasks", get(list_tasks))
}

/// Tasks of a project in creation order.
///
/// Query parameters: `page`, `page_size`, `status` (e.g. `EN_COURS`), `category`.
pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::ProjectTasksQuery>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse_id(&id, "project") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match query.status() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let pagination = services.orchestrator.pagination(query.page, query.page_size);
    let category = query.category.filter(|c| !c.trim().is_empty());

    match services
        .orchestrator
        .list_by_project(project_id, pagination, status, category)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
