use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};

use taskboard_service::attachments::check_task_id;
use taskboard_service::{BatchReport, NewFile};

use super::{bad_request, to_error, ApiError, AppState};
use crate::auth::UserToken;

/// Base64 inflates uploads by a third; leave room for several files at the
/// per-file limit.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/tasks/{id}/attachments",
            get(list_attachments)
                .post(add_attachments)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/api/tasks/{id}/attachments/{attachment_id}",
            delete(delete_attachment),
        )
}

#[derive(Deserialize)]
struct UploadFile {
    name: String,
    #[serde(rename = "type", default = "default_content_type")]
    content_type: String,
    /// Base64-encoded file contents.
    data: String,
}

fn default_content_type() -> String {
    "application/octet-stream".into()
}

#[derive(Deserialize)]
struct UploadBody {
    files: Vec<UploadFile>,
}

fn report_json(report: &BatchReport) -> Value {
    let failures: Vec<Value> = report
        .failures()
        .iter()
        .map(|o| json!({ "file": o.file_name, "error": o.message() }))
        .collect();
    json!({
        "added": report.added(),
        "failures": failures,
        "progress": report.progress(),
    })
}

async fn list_attachments(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.attachments.list_attachments(&token, &task_id).await
        .map(|a| Json(json!(a)))
        .map_err(to_error)
}

async fn add_attachments(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path(task_id): Path<String>,
    Json(body): Json<UploadBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_task_id(&task_id).map_err(to_error)?;
    if body.files.is_empty() {
        return Err(bad_request("no files submitted"));
    }
    let mut files = Vec::with_capacity(body.files.len());
    for file in body.files {
        let data = STANDARD
            .decode(file.data.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64 data: {e}", file.name)))?;
        files.push(NewFile::new(file.name, file.content_type, data));
    }

    let report = state
        .attachments
        .add_attachments(&token, &task_id, files)
        .await;
    let status = if report.failed() == 0 {
        StatusCode::CREATED
    } else if report.succeeded() == 0 {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(report_json(&report))))
}

async fn delete_attachment(
    State(state): State<AppState>,
    UserToken(token): UserToken,
    Path((task_id, attachment_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state
        .attachments
        .delete_attachment_by_id(&token, &task_id, &attachment_id)
        .await
        .map(|id| Json(json!({ "deleted": id })))
        .map_err(to_error)
}
