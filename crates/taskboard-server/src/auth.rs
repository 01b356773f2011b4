use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use taskboard_gateway::AccessToken;

use crate::routes::AppState;

/// Admin endpoint credentials. Only the key's digest is kept.
pub struct AdminAuth {
    pub key_hash: String,
}

impl AdminAuth {
    pub fn from_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            None
        } else {
            Some(Self {
                key_hash: sha256_hex(key),
            })
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        constant_time_eq(&sha256_hex(key), &self.key_hash)
    }
}

/// SHA-256 hash a raw key, returning the hex-encoded digest.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a new admin key: `tb_` + 43 chars of base62.
pub fn generate_api_key() -> String {
    use rand::Rng;
    const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let random_part: String = (0..43)
        .map(|_| {
            let idx = rng.gen_range(0..BASE62.len());
            BASE62[idx] as char
        })
        .collect();
    format!("tb_{random_part}")
}

fn bearer(parts_headers: &axum::http::HeaderMap) -> Option<&str> {
    parts_headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn unauthorized(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg })))
}

/// Middleware guarding admin routes. Without a configured key every
/// admin request is refused.
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = &state.admin_auth else {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "admin endpoints are disabled (no admin key configured)" })),
        )
            .into_response();
    };

    match bearer(request.headers()) {
        Some(key) if auth.accepts(key) => next.run(request).await,
        _ => unauthorized("missing or invalid admin key").into_response(),
    }
}

/// Bearer token of a signed-in user. The backend validates it on use.
pub struct UserToken(pub AccessToken);

impl<S: Send + Sync> FromRequestParts<S> for UserToken {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer(&parts.headers)
            .map(|t| UserToken(AccessToken::new(t)))
            .ok_or_else(|| unauthorized("missing bearer token"))
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
