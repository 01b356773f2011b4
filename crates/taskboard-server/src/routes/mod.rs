pub mod admin;
pub mod attachments;
pub mod columns;
pub mod dashboard;
pub mod health;
pub mod projects;
pub mod session;
pub mod tasks;

use std::sync::Arc;

use axum::{http::StatusCode, middleware, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use taskboard_service::{
    AdminService, AttachmentManager, BoardError, BoardService, DashboardAggregator, SessionFacade,
};

use crate::auth::{admin_middleware, AdminAuth};

pub struct InnerAppState {
    pub board: BoardService,
    pub attachments: AttachmentManager,
    pub dashboard: DashboardAggregator,
    pub sessions: SessionFacade,
    /// `None` when no service-role credential is configured.
    pub admin: Option<AdminService>,
    pub admin_auth: Option<AdminAuth>,
    /// "remote" or "memory".
    pub backend_kind: &'static str,
}

pub type AppState = Arc<InnerAppState>;

pub type ApiError = (StatusCode, Json<Value>);

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .merge(health::routes())
        .merge(session::public_routes());

    let user = Router::new()
        .merge(session::routes())
        .merge(projects::routes())
        .merge(columns::routes())
        .merge(tasks::routes())
        .merge(attachments::routes())
        .merge(dashboard::routes());

    let admin = admin::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        admin_middleware,
    ));

    public
        .merge(user)
        .merge(admin)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn to_error(e: BoardError) -> ApiError {
    let status = match &e {
        BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        BoardError::Validation(_) => StatusCode::BAD_REQUEST,
        BoardError::Auth(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() })))
}

#[cfg(test)]
mod tests {
    use taskboard_gateway::GatewayError;

    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(to_error(BoardError::NotFound("x".into())).0, StatusCode::NOT_FOUND);
        assert_eq!(to_error(BoardError::Validation("x".into())).0, StatusCode::BAD_REQUEST);
        assert_eq!(to_error(BoardError::Auth("x".into())).0, StatusCode::UNAUTHORIZED);
        let (status, Json(body)) =
            to_error(BoardError::Gateway(GatewayError::Internal("down".into())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("down"));
    }
}
