use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_core::user::CreateUser;
use taskboard_service::admin::{default_buckets, BucketSpec};
use taskboard_service::AdminService;

use super::{to_error, ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", post(create_user))
        .route("/api/admin/users/{id}", delete(delete_user))
        .route("/api/admin/roles/reset", post(reset_roles))
        .route("/api/admin/migrations", post(run_migration))
        .route("/api/admin/completed-columns", post(ensure_completed_columns))
        .route("/api/admin/buckets", post(ensure_buckets))
        .route("/api/admin/auth-setup", get(auth_setup))
}

fn admin(state: &AppState) -> Result<&AdminService, ApiError> {
    state.admin.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "admin operations need TASKBOARD_SERVICE_ROLE_KEY" })),
        )
    })
}

async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    admin(&state)?.create_user(&input).await
        .map(|u| (StatusCode::CREATED, Json(json!(u))))
        .map_err(to_error)
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    admin(&state)?.delete_user(&id).await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_error)
}

#[derive(Deserialize)]
struct RoleResetBody {
    #[serde(default)]
    admin_emails: Vec<String>,
}

async fn reset_roles(
    State(state): State<AppState>,
    Json(body): Json<RoleResetBody>,
) -> Result<Json<Value>, ApiError> {
    admin(&state)?.reset_roles(&body.admin_emails).await
        .map(|r| Json(json!(r)))
        .map_err(to_error)
}

#[derive(Deserialize)]
struct MigrationBody {
    sql: String,
}

async fn run_migration(
    State(state): State<AppState>,
    Json(body): Json<MigrationBody>,
) -> Result<Json<Value>, ApiError> {
    admin(&state)?.run_migration(&body.sql).await
        .map(|result| Json(json!({ "result": result })))
        .map_err(to_error)
}

async fn ensure_completed_columns(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    admin(&state)?.ensure_completed_columns().await
        .map(|created| Json(json!({ "created": created })))
        .map_err(to_error)
}

#[derive(Deserialize, Default)]
struct BucketsBody {
    #[serde(default)]
    buckets: Option<Vec<BucketSpec>>,
}

async fn ensure_buckets(
    State(state): State<AppState>,
    body: Option<Json<BucketsBody>>,
) -> Result<Json<Value>, ApiError> {
    let specs = body
        .and_then(|Json(b)| b.buckets)
        .unwrap_or_else(default_buckets);
    admin(&state)?.ensure_buckets(&specs).await
        .map(|created| Json(json!({ "created": created })))
        .map_err(to_error)
}

async fn auth_setup(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = admin(&state)?.check_auth_setup().await;
    Ok(Json(json!({ "ready": report.is_ready(), "tables": report })))
}
