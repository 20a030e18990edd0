use axum::Router;

pub mod projects;
pub mod resources;
pub mod system;
pub mod tasks;
pub mod weather;

/// Router for every work-order endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/projects", projects::router())
        .nest("/resources", resources::router())
        .nest("/weather", weather::router())
}
