use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::query::{Collection, Filter, Query, QueryResult};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Bearer credential attached to every backend call: a user's session
/// token, or the service-role key for admin operations.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Row, procedure, and function access on the hosted backend.
///
/// `HttpGateway` talks to the real service; `MemoryGateway` keeps rows in
/// process for tests and local development.
#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn query(&self, token: &AccessToken, query: &Query) -> Result<QueryResult, GatewayError>;

    /// Insert one row and return it as stored.
    async fn insert(
        &self,
        token: &AccessToken,
        collection: Collection,
        row: &Value,
    ) -> Result<Value, GatewayError>;

    /// Patch every row matching `filters`; returns the updated rows.
    /// An empty result means nothing was updated.
    async fn update(
        &self,
        token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<Vec<Value>, GatewayError>;

    async fn delete(
        &self,
        token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<(), GatewayError>;

    /// Invoke a stored procedure with a JSON argument map.
    async fn rpc(&self, token: &AccessToken, name: &str, args: &Value)
        -> Result<Value, GatewayError>;

    /// Invoke a serverless function by name.
    async fn invoke_function(
        &self,
        token: &AccessToken,
        name: &str,
        body: &Value,
    ) -> Result<Value, GatewayError>;
}

/// User record as the auth service returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Sign-in/sign-up result. `tokens` is `None` when the service requires
/// email confirmation before issuing a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: AuthUser,
    pub tokens: Option<AuthTokens>,
}

/// Password authentication and user administration on the hosted backend.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, GatewayError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthResponse, GatewayError>;

    async fn sign_out(&self, token: &AccessToken) -> Result<(), GatewayError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, GatewayError>;

    async fn get_user(&self, token: &AccessToken) -> Result<AuthUser, GatewayError>;

    /// Create a confirmed user. Requires the service-role token.
    async fn admin_create_user(
        &self,
        service: &AccessToken,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthUser, GatewayError>;

    async fn admin_delete_user(&self, service: &AccessToken, id: &str)
        -> Result<(), GatewayError>;
}
