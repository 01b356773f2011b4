use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_core::task::{CreateTask, UpdateTask};

use super::{to_error, ApiError, AppState};
use crate::auth::UserToken;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/columns/{id}/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/completion", post(set_completion))
}

#[derive(Deserialize)]
struct NewTaskBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    position: f64,
}

#[derive(Deserialize)]
struct CompletionBody {
    completed: bool,
}

async fn list_tasks(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(column_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.board.list_tasks(&token, &column_id).await
        .map(|t| Json(json!(t)))
        .map_err(to_error)
}

async fn create_task(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(column_id): Path<String>,
    Json(body): Json<NewTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let input = CreateTask {
        title: body.title,
        column_id,
        description: body.description,
        position: body.position,
    };
    state.board.create_task(&token, &input).await
        .map(|t| (StatusCode::CREATED, Json(json!(t))))
        .map_err(to_error)
}

async fn get_task(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.board.get_task(&token, &id).await
        .map(|t| Json(json!(t)))
        .map_err(to_error)
}

async fn update_task(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
    Json(input): Json<UpdateTask>,
) -> Result<Json<Value>, ApiError> {
    state.board.update_task(&token, &id, &input).await
        .map(|t| Json(json!(t)))
        .map_err(to_error)
}

async fn set_completion(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
    Json(body): Json<CompletionBody>,
) -> Result<Json<Value>, ApiError> {
    state.board.set_completion(&token, &id, body.completed).await
        .map(|t| Json(json!(t)))
        .map_err(to_error)
}

async fn delete_task(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.board.delete_task(&token, &id).await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_error)
}
