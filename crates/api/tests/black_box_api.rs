use std::sync::Arc;

use fieldwork_api::app::services::AppServices;
use fieldwork_infra::{OrchestratorConfig, WeatherGateMode};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(OrchestratorConfig::default()).await
    }

    async fn spawn_with(config: OrchestratorConfig) -> Self {
        // Same router as prod over an in-memory store, bound to an ephemeral port.
        let app = fieldwork_api::app::build_app(Arc::new(AppServices::in_memory(config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        read(res).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.put(self.url(path)).json(&body).send().await.unwrap();
        read(res).await
    }

    async fn patch(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.patch(self.url(path)).json(&body).send().await.unwrap();
        read(res).await
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        read(res).await
    }

    async fn delete(&self, path: &str) -> StatusCode {
        self.client.delete(self.url(path)).send().await.unwrap().status()
    }

    async fn resource(&self, name: &str, total: i64) -> String {
        let (status, body) = self
            .post(
                "/resources",
                json!({ "name": name, "resource_type": "machine", "unit": "h", "quantity_total": total }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let (status, body) = srv.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let srv = TestServer::spawn().await;
    let resource = srv.resource("Tracteur", 100).await;

    let (status, created) = srv
        .post(
            "/tasks",
            json!({
                "title": "Labour",
                "resources": [{ "resource_id": resource, "quantity": 40 }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["status"], "A_FAIRE");
    assert_eq!(created["reservations"][0]["quantity_required"], 40);
    let task = created["id"].as_str().unwrap().to_string();

    let (_, r) = srv.get(&format!("/resources/{resource}")).await;
    assert_eq!((r["quantity_available"].as_i64(), r["quantity_reserved"].as_i64()), (Some(60), Some(40)));

    let (status, err) = srv
        .post(
            "/tasks",
            json!({ "title": "Semis", "resources": [{ "resource_id": resource, "quantity": 70 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "insufficient_stock");

    let (status, _) = srv.patch(&format!("/tasks/{task}"), json!({ "status": "EN_COURS" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, done) = srv.patch(&format!("/tasks/{task}"), json!({ "status": "TERMINEE" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["completion_percent"], 100);

    let (_, r) = srv.get(&format!("/resources/{resource}")).await;
    assert_eq!(r["quantity_available"], 100);
    assert_eq!(r["status"], "DISPONIBLE");

    let (status, reservations) = srv.get(&format!("/tasks/{task}/reservations")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!reservations[0]["released_at"].is_null());
}

#[tokio::test]
async fn cycles_are_rejected_with_400() {
    let srv = TestServer::spawn().await;
    let (_, a) = srv.post("/tasks", json!({ "title": "A" })).await;
    let a = a["id"].as_str().unwrap().to_string();
    let (status, b) = srv
        .post("/tasks", json!({ "title": "B", "dependencies": [{ "dependency_id": a }] }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{b}");
    let b = b["id"].as_str().unwrap().to_string();

    let (status, err) = srv
        .post(&format!("/tasks/{a}/dependencies"), json!({ "dependency_id": b }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "circular_dependency");

    let (_, dependents) = srv.get(&format!("/tasks/{a}/dependents")).await;
    assert_eq!(dependents.as_array().map(Vec::len), Some(1));

    assert_eq!(
        srv.delete(&format!("/tasks/{b}/dependencies/{a}")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        srv.delete(&format!("/tasks/{b}/dependencies/{a}")).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn weather_verdict_and_enforced_gate() {
    let srv = TestServer::spawn_with(OrchestratorConfig {
        weather_gate: WeatherGateMode::Enforce,
        ..OrchestratorConfig::default()
    })
    .await;

    let (_, task) = srv
        .post(
            "/tasks",
            json!({
                "title": "Désherbage",
                "weather_dependent": true,
                "weather": { "min_temperature": 20.0, "max_wind_speed": 20.0 }
            }),
        )
        .await;
    let task = task["id"].as_str().unwrap().to_string();

    let (status, err) = srv.get(&format!("/tasks/{task}/weather")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err["error"], "weather_unavailable");

    let (status, _) = srv
        .put(
            "/weather/current",
            json!({ "temperature": 15.0, "wind_speed": 10.0, "precipitation": 0.0, "humidity": 60.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = srv.get(&format!("/tasks/{task}/weather")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["favorable"], false);

    let (status, err) = srv.patch(&format!("/tasks/{task}"), json!({ "status": "EN_COURS" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "weather_unfavorable");
    assert_eq!(err["violated_constraints"][0]["kind"], "temperature");
    assert_eq!(err["violated_constraints"][0]["constraint"], "min_temperature");
}

#[tokio::test]
async fn malformed_and_unknown_ids() {
    let srv = TestServer::spawn().await;
    let (status, err) = srv.get("/tasks/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_id");

    let (status, err) = srv.get("/tasks/01890a5d-ac96-774b-bcce-b302099a8057").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "task_not_found");
}

#[tokio::test]
async fn project_listing_pages_and_filters() {
    let srv = TestServer::spawn().await;
    let project = "01890a5d-ac96-774b-bcce-b302099a8058";
    for title in ["T0", "T1", "T2"] {
        let (status, _) = srv
            .post("/tasks", json!({ "title": title, "project_id": project, "category": "semis" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = srv
        .get(&format!("/projects/{project}/tasks?page=1&page_size=2&status=A_FAIRE"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["items"][0]["title"], "T0");

    let (status, err) = srv.get(&format!("/projects/{project}/tasks?status=started")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_status");
}

#[tokio::test]
async fn usage_and_comments() {
    let srv = TestServer::spawn().await;
    let resource = srv.resource("Engrais", 50).await;
    let (_, task) = srv
        .post(
            "/tasks",
            json!({ "title": "Fertilisation", "resources": [{ "resource_id": resource, "quantity": 40 }] }),
        )
        .await;
    let task = task["id"].as_str().unwrap().to_string();

    let (status, reservation) = srv
        .put(
            &format!("/tasks/{task}/resources/{resource}/usage"),
            json!({ "quantity_used": 35 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["quantity_used"], 35);

    let (status, err) = srv
        .put(
            &format!("/tasks/{task}/resources/{resource}/usage"),
            json!({ "quantity_used": 41 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "usage_exceeds_required");

    let (status, _) = srv
        .post(
            &format!("/tasks/{task}/comments"),
            json!({ "author_id": "01890a5d-ac96-774b-bcce-b302099a8059", "text": "sacs livrés" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, comments) = srv.get(&format!("/tasks/{task}/comments")).await;
    assert_eq!(comments[0]["text"], "sacs livrés");

    assert_eq!(srv.delete(&format!("/tasks/{task}")).await, StatusCode::NO_CONTENT);
    let (_, r) = srv.get(&format!("/resources/{resource}")).await;
    assert_eq!(r["quantity_available"], 50);
}

#[tokio::test]
async fn resource_condition_and_adjustment() {
    let srv = TestServer::spawn().await;
    let resource = srv.resource("Drone", 2).await;

    let (status, r) = srv
        .put(&format!("/resources/{resource}/condition"), json!({ "condition": "maintenance" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(r["status"], "EN_MAINTENANCE");

    let (status, r) = srv
        .post(&format!("/resources/{resource}/adjust"), json!({ "delta": 3 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(r["quantity_total"], 5);

    let (status, page) = srv.get("/resources?page_size=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
}
