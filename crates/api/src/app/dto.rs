use serde::Deserialize;

use fieldwork_core::EmployeeId;
use fieldwork_resources::ResourceCondition;
use fieldwork_tasks::TaskStatus;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub author_id: EmployeeId,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUsageRequest {
    pub quantity_used: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustResourceRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetConditionRequest {
    pub condition: ResourceCondition,
}

// -------------------------
// Query parameters
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectTasksQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<String>,
    pub category: Option<String>,
}

impl ProjectTasksQuery {
    pub fn status(&self) -> Result<Option<TaskStatus>, axum::response::Response> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e: fieldwork_core::DomainError| {
                errors::json_error(
                    axum::http::StatusCode::BAD_REQUEST,
                    "invalid_status",
                    e.to_string(),
                )
            }),
        }
    }
}
