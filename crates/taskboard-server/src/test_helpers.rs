use std::sync::Arc;

use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;

use taskboard_gateway::{Backend, Collection, MemoryAuth, MemoryGateway};
use taskboard_service::attachments::DEFAULT_BUCKET;
use taskboard_store::{BucketOptions, LocalStore, ObjectStore, StoreConfig};

use crate::{assemble_state, ServerConfig};

/// Task seeded by `test_router_with_task`.
pub const TEST_TASK_ID: &str = "task-1";

async fn temp_store() -> Arc<dyn ObjectStore> {
    let dir = tempfile::tempdir()
        .unwrap()
        .keep()
        .to_string_lossy()
        .to_string();
    let store = LocalStore::new(&StoreConfig {
        local_data_dir: Some(dir),
        ..Default::default()
    });
    store
        .create_bucket(DEFAULT_BUCKET, &BucketOptions::default())
        .await
        .unwrap();
    Arc::new(store)
}

async fn router_over(gateway: Arc<MemoryGateway>, admin_key: Option<String>) -> Router {
    let backend = Backend {
        gateway,
        auth: Arc::new(MemoryAuth::new()),
    };
    let config = ServerConfig {
        admin_key,
        ..Default::default()
    };
    crate::build_router(assemble_state(backend, temp_store().await, &config))
}

/// Router over an empty in-memory backend and temp store, no admin key.
pub async fn test_router() -> Router {
    router_over(Arc::new(MemoryGateway::new()), None).await
}

/// Router with admin endpoints enabled, returning (router, admin_key).
pub async fn test_router_with_admin() -> (Router, String) {
    let key = crate::auth::generate_api_key();
    let router = router_over(Arc::new(MemoryGateway::new()), Some(key.clone())).await;
    (router, key)
}

/// Router whose backend holds one task, returning (router, task_id).
pub async fn test_router_with_task() -> (Router, String) {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        Collection::Tasks,
        json!({
            "id": TEST_TASK_ID,
            "title": "Write docs",
            "column_id": "col-1",
            "attachments": [],
        }),
    );
    (router_over(gateway, None).await, TEST_TASK_ID.to_string())
}

/// A running test server with base_url and background task handle.
pub struct TestServer {
    pub base_url: String,
    pub admin_key: String,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawn an axum test server on a random port with admin endpoints enabled.
pub async fn spawn_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");
    let (app, admin_key) = test_router_with_admin().await;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        base_url,
        admin_key,
        _handle: handle,
    }
}
