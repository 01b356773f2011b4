use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_service::Session;

use super::{to_error, ApiError, AppState};
use crate::auth::UserToken;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/refresh", post(refresh))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/user", get(current_user))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct SignupBody {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

fn session_json(session: &Session) -> Value {
    json!({
        "user": session.user,
        "access_token": session.access_token.as_str(),
        "refresh_token": session.refresh_token,
        "expires_at": session.expires_at,
    })
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .sessions
        .login(&body.email, &body.password)
        .await
        .map(|s| Json(session_json(&s)))
        .map_err(to_error)
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state
        .sessions
        .signup(&body.name, &body.email, &body.password)
        .await
        .map_err(to_error)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": outcome.user,
            "session": outcome.session.as_ref().map(session_json),
            "welcome_email": outcome.welcome,
        })),
    ))
}

async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .sessions
        .refresh_session(&body.refresh_token)
        .await
        .map(|s| Json(session_json(&s)))
        .map_err(to_error)
}

async fn logout(
    State(state): State<AppState>,
    UserToken(token): UserToken,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .logout(&token)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(to_error)
}

async fn current_user(
    State(state): State<AppState>,
    UserToken(token): UserToken,
) -> Result<Json<Value>, ApiError> {
    state
        .sessions
        .current_user(&token)
        .await
        .map(|u| Json(json!(u)))
        .map_err(to_error)
}
