//! End-to-end tests against an in-process server over the in-memory backend.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use taskboard_server::test_helpers::{spawn_test_server, TestServer};

struct Api {
    server: TestServer,
    client: Client,
    token: Option<String>,
}

impl Api {
    async fn start() -> Self {
        Api {
            server: spawn_test_server().await,
            client: Client::new(),
            token: None,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_with(method, path, body, self.token.as_deref()).await
    }

    async fn send_with(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.server.base_url));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, value)
    }

    async fn sign_in(&mut self) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/signup",
                Some(json!({"name": "Ann", "email": "ann@example.com", "password": "secret1"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["welcome_email"]["success"], true);

        let (status, session) = self
            .send(
                Method::POST,
                "/api/auth/login",
                Some(json!({"email": "ann@example.com", "password": "secret1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        self.token = session["access_token"].as_str().map(str::to_string);
        session
    }
}

#[tokio::test]
async fn health_reports_memory_backend() {
    let api = Api::start().await;
    let (status, body) = api.send(Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let mut api = Api::start().await;
    let session = api.sign_in().await;
    assert_eq!(session["user"]["name"], "Ann");

    let (status, user) = api.send(Method::GET, "/api/auth/user", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["email"], "ann@example.com");

    let (status, refreshed) = api
        .send(
            Method::POST,
            "/api/auth/refresh",
            Some(json!({"refresh_token": session["refresh_token"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    api.token = refreshed["access_token"].as_str().map(str::to_string);

    let (status, _) = api.send(Method::POST, "/api/auth/logout", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = api.send(Method::GET, "/api/auth/user", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = api
        .send(
            Method::POST,
            "/api/auth/login",
            Some(json!({"email": "ann@example.com", "password": "wrong"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn board_attachments_and_dashboard_over_http() {
    let mut api = Api::start().await;
    api.sign_in().await;

    let (status, project) = api
        .send(Method::POST, "/api/projects", Some(json!({"title": "Launch"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = project["id"].as_str().unwrap().to_string();

    let mut column_ids = Vec::new();
    for title in ["Backlog", "Doing", "Completed"] {
        let (status, column) = api
            .send(
                Method::POST,
                &format!("/api/projects/{project_id}/columns"),
                Some(json!({"title": title})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        column_ids.push(column["id"].as_str().unwrap().to_string());
    }

    let (_, columns) = api
        .send(Method::GET, &format!("/api/projects/{project_id}/columns"), None)
        .await;
    let orders: Vec<i64> = columns
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["order"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![0, 1, 2]);

    // Backlog 2, Doing 1, Completed 3.
    let mut first_task = String::new();
    for (column_id, n) in column_ids.iter().zip([2, 1, 3]) {
        for i in 0..n {
            let (status, task) = api
                .send(
                    Method::POST,
                    &format!("/api/columns/{column_id}/tasks"),
                    Some(json!({"title": format!("task {i}"), "position": i})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            if first_task.is_empty() {
                first_task = task["id"].as_str().unwrap().to_string();
            }
        }
    }

    let (status, dashboard) = api.send(Method::GET, "/api/dashboard", None).await;
    assert_eq!(status, StatusCode::OK);
    let metrics = &dashboard["metrics"];
    assert_eq!(metrics["total_tasks"], 6);
    assert_eq!(metrics["completed_tasks"], 3);
    let percentages: Vec<u64> = metrics["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["percentage"].as_u64().unwrap())
        .collect();
    assert_eq!(percentages, vec![33, 17, 50]);

    let (status, report) = api
        .send(
            Method::POST,
            &format!("/api/tasks/{first_task}/attachments"),
            Some(json!({"files": [
                {"name": "notes.txt", "type": "text/plain", "data": STANDARD.encode("hello")},
                {"name": "big.bin", "data": STANDARD.encode(vec![0u8; 10 * 1024 * 1024 + 1])},
            ]})),
        )
        .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(report["added"].as_array().unwrap().len(), 1);
    assert_eq!(report["failures"][0]["file"], "big.bin");
    assert_eq!(report["progress"], 50);

    let attachment_id = report["added"][0]["id"].as_str().unwrap().to_string();
    let (_, task) = api
        .send(Method::GET, &format!("/api/tasks/{first_task}"), None)
        .await;
    assert_eq!(task["attachments"][0]["id"], attachment_id.as_str());

    let (status, deleted) = api
        .send(
            Method::DELETE,
            &format!("/api/tasks/{first_task}/attachments/{attachment_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], attachment_id.as_str());

    let (status, done) = api
        .send(
            Method::POST,
            &format!("/api/tasks/{first_task}/completion"),
            Some(json!({"completed": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(done["completed_at"].is_string());
}

#[tokio::test]
async fn admin_endpoints_need_the_admin_key() {
    let api = Api::start().await;
    let key = api.server.admin_key.clone();

    let (status, _) = api
        .send_with(Method::GET, "/api/admin/auth-setup", None, Some("tb_wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, report) = api
        .send_with(Method::GET, "/api/admin/auth-setup", None, Some(&key))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["ready"], true);

    let (status, reset) = api
        .send_with(
            Method::POST,
            "/api/admin/roles/reset",
            Some(json!({"admin_emails": ["nobody@example.com"]})),
            Some(&key),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["missing"], json!(["nobody@example.com"]));
}
