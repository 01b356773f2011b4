use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_core::column::{CreateColumn, UpdateColumn};

use super::{to_error, ApiError, AppState};
use crate::auth::UserToken;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/projects/{id}/columns",
            get(list_columns).post(create_column),
        )
        .route("/api/columns/{id}", put(update_column).delete(delete_column))
}

#[derive(Deserialize)]
struct NewColumnBody {
    title: String,
    /// Defaults to after the last column.
    #[serde(default)]
    order: Option<i64>,
}

async fn list_columns(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.board.list_columns(&token, &project_id).await
        .map(|c| Json(json!(c)))
        .map_err(to_error)
}

async fn create_column(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(project_id): Path<String>,
    Json(body): Json<NewColumnBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let order = match body.order {
        Some(order) => order,
        None => state
            .board
            .list_columns(&token, &project_id)
            .await
            .map_err(to_error)?
            .iter()
            .map(|c| c.order)
            .max()
            .map_or(0, |m| m + 1),
    };
    let input = CreateColumn {
        title: body.title,
        project_id,
        order,
    };
    state.board.create_column(&token, &input).await
        .map(|c| (StatusCode::CREATED, Json(json!(c))))
        .map_err(to_error)
}

async fn update_column(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
    Json(input): Json<UpdateColumn>,
) -> Result<Json<Value>, ApiError> {
    state.board.update_column(&token, &id, &input).await
        .map(|c| Json(json!(c)))
        .map_err(to_error)
}

async fn delete_column(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.board.delete_column(&token, &id).await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_error)
}
