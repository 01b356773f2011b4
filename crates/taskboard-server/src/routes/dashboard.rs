use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use taskboard_core::DashboardState;

use super::AppState;
use crate::auth::UserToken;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/dashboard", get(dashboard))
}

async fn dashboard(
    State(state): State<AppState>,
    UserToken(token): UserToken,
) -> (StatusCode, Json<Value>) {
    let result = state.dashboard.load(&token).await;
    let status = match result {
        DashboardState::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(json!(result)))
}
