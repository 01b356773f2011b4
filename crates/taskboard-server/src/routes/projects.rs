use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_core::project::{CreateProject, UpdateProject};

use super::{to_error, ApiError, AppState};
use crate::auth::UserToken;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/favorite", post(toggle_favorite))
        .route("/api/projects/{id}/invitations", post(invite))
}

async fn list_projects(
    State(state): State<AppState>,
    UserToken(token): UserToken,
) -> Result<Json<Value>, ApiError> {
    state.board.list_projects(&token).await
        .map(|p| Json(json!(p)))
        .map_err(to_error)
}

async fn get_project(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.board.get_project(&token, &id).await
        .map(|p| Json(json!(p)))
        .map_err(to_error)
}

async fn create_project(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Json(input): Json<CreateProject>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.board.create_project(&token, &input).await
        .map(|p| (StatusCode::CREATED, Json(json!(p))))
        .map_err(to_error)
}

async fn update_project(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
    Json(input): Json<UpdateProject>,
) -> Result<Json<Value>, ApiError> {
    state.board.update_project(&token, &id, &input).await
        .map(|p| Json(json!(p)))
        .map_err(to_error)
}

async fn delete_project(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.board.delete_project(&token, &id).await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_error)
}

async fn toggle_favorite(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.board.toggle_favorite(&token, &id).await
        .map(|p| Json(json!(p)))
        .map_err(to_error)
}

#[derive(Deserialize)]
struct InviteBody {
    email: String,
    #[serde(default)]
    invited_by: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

async fn invite(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
    Json(body): Json<InviteBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .board
        .invite_to_project(&token, &id, &body.email, body.invited_by, body.message)
        .await
        .map(|outcome| Json(json!(outcome)))
        .map_err(to_error)
}
