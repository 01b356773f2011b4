use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::query::{Collection, Filter, Query, QueryKind, QueryResult};
use crate::{
    AccessToken, AuthBackend, AuthResponse, AuthTokens, AuthUser, DataGateway, GatewayError,
};

/// Row, procedure, and function client for the hosted backend
/// (`/rest/v1`, `/functions/v1`).
pub struct HttpGateway {
    base_url: String,
    anon_key: String,
    client: Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client: Client::new(),
        }
    }

    fn with_auth(&self, builder: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token.as_str()))
    }

    fn table_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.as_str())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        builder
            .send()
            .await
            .map_err(|e| GatewayError::Internal(format!("connection failed: {e}")))
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| {
            let op = if f.value.is_null() {
                "is.null".to_string()
            } else {
                format!("eq.{}", f.value_text())
            };
            (f.column.clone(), op)
        })
        .collect()
}

pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.select_clause())];
    params.extend(filter_params(&query.filters));
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| {
                format!(
                    "{}.{}",
                    o.column,
                    if o.ascending { "asc" } else { "desc" }
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
pub(crate) fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

async fn handle_json(resp: reqwest::Response) -> Result<Value, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(parse_error_with_status(status, resp).await);
    }
    let body = resp
        .text()
        .await
        .map_err(|e| GatewayError::Internal(format!("read body: {e}")))?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| GatewayError::Shape(format!("json decode: {e}")))
}

async fn handle_empty(resp: reqwest::Response) -> Result<(), GatewayError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(parse_error_with_status(status, resp).await)
    }
}

async fn parse_error_with_status(status: StatusCode, resp: reqwest::Response) -> GatewayError {
    let body = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v[*k].as_str().map(String::from))
        })
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(msg),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => {
            GatewayError::InvalidInput(msg)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(msg),
        _ => GatewayError::Internal(format!("{status}: {msg}")),
    }
}

fn into_row_list(value: Value) -> Result<Vec<Value>, GatewayError> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(GatewayError::Shape(format!("expected row array, got {other}"))),
    }
}

#[async_trait]
impl DataGateway for HttpGateway {
    async fn query(&self, token: &AccessToken, query: &Query) -> Result<QueryResult, GatewayError> {
        let builder = match query.kind {
            QueryKind::Rows => self.client.get(self.table_url(query.collection)),
            // HEAD with an exact count returns only the Content-Range total.
            QueryKind::Count => self
                .client
                .head(self.table_url(query.collection))
                .header("Prefer", "count=exact"),
        }
        .query(&query_params(query));
        let resp = self.send(self.with_auth(builder, token)).await?;

        match query.kind {
            QueryKind::Rows => Ok(QueryResult::Rows(into_row_list(handle_json(resp).await?)?)),
            QueryKind::Count => {
                let total = resp
                    .headers()
                    .get("content-range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total);
                handle_empty(resp).await?;
                total
                    .map(QueryResult::Count)
                    .ok_or_else(|| GatewayError::Shape("missing content-range total".into()))
            }
        }
    }

    async fn insert(
        &self,
        token: &AccessToken,
        collection: Collection,
        row: &Value,
    ) -> Result<Value, GatewayError> {
        let builder = self
            .client
            .post(self.table_url(collection))
            .header("Prefer", "return=representation")
            .json(row);
        let resp = self.send(self.with_auth(builder, token)).await?;
        into_row_list(handle_json(resp).await?)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Shape(format!("insert into {collection} returned no row")))
    }

    async fn update(
        &self,
        token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let builder = self
            .client
            .patch(self.table_url(collection))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(patch);
        let resp = self.send(self.with_auth(builder, token)).await?;
        into_row_list(handle_json(resp).await?)
    }

    async fn delete(
        &self,
        token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<(), GatewayError> {
        if filters.is_empty() {
            return Err(GatewayError::InvalidInput(format!(
                "refusing unfiltered delete on {collection}"
            )));
        }
        let builder = self
            .client
            .delete(self.table_url(collection))
            .query(&filter_params(filters));
        let resp = self.send(self.with_auth(builder, token)).await?;
        handle_empty(resp).await
    }

    async fn rpc(
        &self,
        token: &AccessToken,
        name: &str,
        args: &Value,
    ) -> Result<Value, GatewayError> {
        let builder = self
            .client
            .post(format!("{}/rest/v1/rpc/{name}", self.base_url))
            .json(args);
        let resp = self.send(self.with_auth(builder, token)).await?;
        handle_json(resp).await
    }

    async fn invoke_function(
        &self,
        token: &AccessToken,
        name: &str,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let builder = self
            .client
            .post(format!("{}/functions/v1/{name}", self.base_url))
            .json(body);
        let resp = self.send(self.with_auth(builder, token)).await?;
        handle_json(resp).await
    }
}

/// Auth service client (`/auth/v1`).
pub struct HttpAuth {
    base_url: String,
    anon_key: String,
    client: Client,
}

impl HttpAuth {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.base_url)
    }

    async fn post(
        &self,
        path: &str,
        bearer: Option<&AccessToken>,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let bearer = bearer.map(AccessToken::as_str).unwrap_or(self.anon_key.as_str());
        let resp = self
            .client
            .post(self.url(path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Internal(format!("connection failed: {e}")))?;
        handle_json(resp).await
    }
}

/// Decode a token grant or sign-up response. Sign-up without
/// auto-confirmation returns the bare user object.
pub(crate) fn parse_auth_response(value: Value) -> Result<AuthResponse, GatewayError> {
    if value.get("access_token").is_some() {
        let tokens: AuthTokens = serde_json::from_value(value.clone())
            .map_err(|e| GatewayError::Shape(format!("auth tokens: {e}")))?;
        let user: AuthUser = serde_json::from_value(value["user"].clone())
            .map_err(|e| GatewayError::Shape(format!("auth user: {e}")))?;
        return Ok(AuthResponse {
            user,
            tokens: Some(tokens),
        });
    }
    let user_value = match value.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => value,
    };
    let user: AuthUser = serde_json::from_value(user_value)
        .map_err(|e| GatewayError::Shape(format!("auth user: {e}")))?;
    Ok(AuthResponse { user, tokens: None })
}

#[async_trait]
impl AuthBackend for HttpAuth {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, GatewayError> {
        let value = self
            .post(
                "/token?grant_type=password",
                None,
                &json!({ "email": email, "password": password }),
            )
            .await
            .map_err(|e| match e {
                // The token endpoint answers bad credentials with 400.
                GatewayError::InvalidInput(msg) => GatewayError::Unauthorized(msg),
                other => other,
            })?;
        parse_auth_response(value)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthResponse, GatewayError> {
        let value = self
            .post(
                "/signup",
                None,
                &json!({ "email": email, "password": password, "data": metadata }),
            )
            .await?;
        parse_auth_response(value)
    }

    async fn sign_out(&self, token: &AccessToken) -> Result<(), GatewayError> {
        self.post("/logout", Some(token), &json!({})).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, GatewayError> {
        let value = self
            .post(
                "/token?grant_type=refresh_token",
                None,
                &json!({ "refresh_token": refresh_token }),
            )
            .await
            .map_err(|e| match e {
                GatewayError::InvalidInput(msg) => GatewayError::Unauthorized(msg),
                other => other,
            })?;
        parse_auth_response(value)
    }

    async fn get_user(&self, token: &AccessToken) -> Result<AuthUser, GatewayError> {
        let resp = self
            .client
            .get(self.url("/user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token.as_str()))
            .send()
            .await
            .map_err(|e| GatewayError::Internal(format!("connection failed: {e}")))?;
        let value = handle_json(resp).await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Shape(format!("auth user: {e}")))
    }

    async fn admin_create_user(
        &self,
        service: &AccessToken,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthUser, GatewayError> {
        let value = self
            .post(
                "/admin/users",
                Some(service),
                &json!({
                    "email": email,
                    "password": password,
                    "email_confirm": true,
                    "user_metadata": metadata,
                }),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Shape(format!("auth user: {e}")))
    }

    async fn admin_delete_user(
        &self,
        service: &AccessToken,
        id: &str,
    ) -> Result<(), GatewayError> {
        let resp = self
            .client
            .delete(self.url(&format!("/admin/users/{id}")))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", service.as_str()))
            .send()
            .await
            .map_err(|e| GatewayError::Internal(format!("connection failed: {e}")))?;
        handle_empty(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_render_select_filters_and_order() {
        let q = Query::rows(Collection::Columns)
            .select(&["id", "title", "order"])
            .filter(Filter::eq("project_id", "p1"))
            .filter(Filter::eq("archived", Value::Null))
            .order_by("order", true)
            .order_by("created_at", false)
            .limit(10);
        let params = query_params(&q);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "id,title,order".to_string()),
                ("project_id".to_string(), "eq.p1".to_string()),
                ("archived".to_string(), "is.null".to_string()),
                ("order".to_string(), "order.asc,created_at.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn content_range_total_parses() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn auth_response_with_session() {
        let value = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {"id": "u1", "email": "a@b.c", "user_metadata": {"name": "Ann"}}
        });
        let resp = parse_auth_response(value).unwrap();
        assert_eq!(resp.user.id, "u1");
        assert_eq!(resp.tokens.unwrap().refresh_token, "rt");
    }

    #[test]
    fn auth_response_pending_confirmation() {
        let value = json!({"id": "u2", "email": "x@y.z", "user_metadata": {}});
        let resp = parse_auth_response(value).unwrap();
        assert_eq!(resp.user.id, "u2");
        assert!(resp.tokens.is_none());
    }
}
