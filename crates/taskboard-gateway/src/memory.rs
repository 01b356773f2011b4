use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::query::{Collection, Filter, Query, QueryKind, QueryResult};
use crate::{
    AccessToken, AuthBackend, AuthResponse, AuthTokens, AuthUser, DataGateway, GatewayError,
};

/// Operations a `MemoryGateway` can be told to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Query(Collection),
    /// Fail queries on `collection` carrying an equality filter `column = value`.
    QueryWhere(Collection, String, String),
    Insert(Collection),
    Update(Collection),
    Delete(Collection),
    Rpc(String),
    Function(String),
}

/// In-process row storage, handed to stored-procedure handlers.
#[derive(Debug, Default)]
pub struct MemoryTables {
    rows: HashMap<Collection, Vec<Value>>,
}

impl MemoryTables {
    pub fn rows(&self, collection: Collection) -> &[Value] {
        self.rows.get(&collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rows_mut(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.rows.entry(collection).or_default()
    }

    /// Patch matching rows in place, returning the patched rows.
    pub fn patch(&mut self, collection: Collection, filters: &[Filter], patch: &Value) -> Vec<Value> {
        let mut updated = Vec::new();
        for row in self.rows_mut(collection).iter_mut() {
            if filters.iter().all(|f| f.matches(row)) {
                if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                    for (k, v) in fields {
                        target.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        updated
    }
}

type Procedure = Box<dyn Fn(&mut MemoryTables, &Value) -> Result<Value, GatewayError> + Send + Sync>;

/// `DataGateway` double that keeps rows in memory, with failure injection
/// and a call log for asserting which remote operations ran.
pub struct MemoryGateway {
    tables: Mutex<MemoryTables>,
    procedures: Mutex<HashMap<String, Procedure>>,
    failures: Mutex<HashSet<FailPoint>>,
    hidden_by_default: Mutex<HashSet<(Collection, String)>>,
    calls: Mutex<Vec<String>>,
    function_calls: Mutex<Vec<(String, Value)>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(MemoryTables::default()),
            procedures: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            hidden_by_default: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            function_calls: Mutex::new(Vec::new()),
        }
    }

    /// Insert a row directly, bypassing failure injection and the call log.
    pub fn seed(&self, collection: Collection, row: Value) {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.rows_mut(collection).push(row);
    }

    /// Snapshot of a collection's rows.
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.rows(collection).to_vec()
    }

    pub fn fail(&self, point: FailPoint) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(point);
    }

    pub fn recover(&self, point: &FailPoint) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(point);
    }

    /// Omit `column` from `select *` results, mimicking backends that
    /// narrow wide columns unless they are named explicitly.
    pub fn hide_by_default(&self, collection: Collection, column: &str) {
        self.hidden_by_default
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((collection, column.to_string()));
    }

    pub fn register_procedure<F>(&self, name: &str, handler: F)
    where
        F: Fn(&mut MemoryTables, &Value) -> Result<Value, GatewayError> + Send + Sync + 'static,
    {
        self.procedures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Box::new(handler));
    }

    /// Log of operations in call order, e.g. `"update tasks"`, `"rpc name"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn function_calls(&self) -> Vec<(String, Value)> {
        self.function_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn check(&self, point: &FailPoint) -> Result<(), GatewayError> {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if failures.contains(point) {
            Err(GatewayError::Internal(format!("injected failure: {point:?}")))
        } else {
            Ok(())
        }
    }

    fn check_query(&self, query: &Query) -> Result<(), GatewayError> {
        self.check(&FailPoint::Query(query.collection))?;
        for filter in &query.filters {
            self.check(&FailPoint::QueryWhere(
                query.collection,
                filter.column.clone(),
                filter.value_text(),
            ))?;
        }
        Ok(())
    }

    fn project(&self, query: &Query, row: &Value) -> Value {
        let Some(fields) = row.as_object() else {
            return row.clone();
        };
        let projected: Map<String, Value> = if query.select.is_empty() {
            let hidden = self
                .hidden_by_default
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            fields
                .iter()
                .filter(|(k, _)| !hidden.contains(&(query.collection, (*k).clone())))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            query
                .select
                .iter()
                .filter_map(|col| fields.get(col).map(|v| (col.clone(), v.clone())))
                .collect()
        };
        Value::Object(projected)
    }
}

fn compare_field(a: &Value, b: &Value, column: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.get(column), b.get(column)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        // Nulls sort last, as the row API does for ascending order.
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Greater,
        (_, Some(Value::Null) | None) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn query(&self, _token: &AccessToken, query: &Query) -> Result<QueryResult, GatewayError> {
        self.record(format!("query {}", query.collection));
        self.check_query(query)?;

        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<&Value> = tables
            .rows(query.collection)
            .iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect();

        if query.kind == QueryKind::Count {
            return Ok(QueryResult::Count(matched.len() as u64));
        }

        matched.sort_by(|a, b| {
            query
                .order
                .iter()
                .map(|o| {
                    let ord = compare_field(a, b, &o.column);
                    if o.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(QueryResult::Rows(
            matched
                .into_iter()
                .take(limit)
                .map(|row| self.project(query, row))
                .collect(),
        ))
    }

    async fn insert(
        &self,
        _token: &AccessToken,
        collection: Collection,
        row: &Value,
    ) -> Result<Value, GatewayError> {
        self.record(format!("insert {collection}"));
        self.check(&FailPoint::Insert(collection))?;

        let mut row = row.clone();
        let fields = row
            .as_object_mut()
            .ok_or_else(|| GatewayError::InvalidInput("row must be an object".into()))?;
        fields
            .entry("id")
            .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.rows_mut(collection).push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        _token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        self.record(format!("update {collection}"));
        self.check(&FailPoint::Update(collection))?;

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.patch(collection, filters, patch))
    }

    async fn delete(
        &self,
        _token: &AccessToken,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<(), GatewayError> {
        self.record(format!("delete {collection}"));
        self.check(&FailPoint::Delete(collection))?;
        if filters.is_empty() {
            return Err(GatewayError::InvalidInput(format!(
                "refusing unfiltered delete on {collection}"
            )));
        }

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .rows_mut(collection)
            .retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok(())
    }

    async fn rpc(
        &self,
        _token: &AccessToken,
        name: &str,
        args: &Value,
    ) -> Result<Value, GatewayError> {
        self.record(format!("rpc {name}"));
        self.check(&FailPoint::Rpc(name.to_string()))?;

        let procedures = self.procedures.lock().unwrap_or_else(|e| e.into_inner());
        let handler = procedures
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(format!("procedure {name}")))?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        handler(&mut tables, args)
    }

    async fn invoke_function(
        &self,
        _token: &AccessToken,
        name: &str,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        self.record(format!("function {name}"));
        self.function_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), body.clone()));
        self.check(&FailPoint::Function(name.to_string()))?;
        Ok(json!({ "success": true }))
    }
}

struct AccountRecord {
    user: AuthUser,
    password: String,
}

/// `AuthBackend` double: accounts, access tokens, and refresh tokens in memory.
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, AccountRecord>>,
    access_tokens: Mutex<HashMap<String, String>>,
    refresh_tokens: Mutex<HashMap<String, String>>,
    unreachable: Mutex<bool>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            access_tokens: Mutex::new(HashMap::new()),
            refresh_tokens: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(false),
        }
    }

    /// Make every call fail as if the service were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap_or_else(|e| e.into_inner()) = unreachable;
    }

    fn check_reachable(&self) -> Result<(), GatewayError> {
        if *self.unreachable.lock().unwrap_or_else(|e| e.into_inner()) {
            Err(GatewayError::Internal("connection failed: auth unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn create_account(
        &self,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthUser, GatewayError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let key = email.to_lowercase();
        if accounts.contains_key(&key) {
            return Err(GatewayError::InvalidInput("user already registered".into()));
        }
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: metadata.clone(),
        };
        accounts.insert(
            key,
            AccountRecord {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        Ok(user)
    }

    fn issue_tokens(&self, user: &AuthUser) -> AuthTokens {
        let access = format!("at-{}", uuid::Uuid::new_v4());
        let refresh = format!("rt-{}", uuid::Uuid::new_v4());
        self.access_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(access.clone(), user.id.clone());
        self.refresh_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(refresh.clone(), user.id.clone());
        AuthTokens {
            access_token: access,
            refresh_token: refresh,
            expires_in: 3600,
        }
    }

    fn user_by_id(&self, id: &str) -> Option<AuthUser> {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts
            .values()
            .find(|a| a.user.id == id)
            .map(|a| a.user.clone())
    }
}

#[async_trait]
impl AuthBackend for MemoryAuth {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, GatewayError> {
        self.check_reachable()?;
        let user = {
            let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(GatewayError::Unauthorized("invalid login credentials".into())),
            }
        };
        let tokens = self.issue_tokens(&user);
        Ok(AuthResponse {
            user,
            tokens: Some(tokens),
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthResponse, GatewayError> {
        self.check_reachable()?;
        let user = self.create_account(email, password, metadata)?;
        let tokens = self.issue_tokens(&user);
        Ok(AuthResponse {
            user,
            tokens: Some(tokens),
        })
    }

    async fn sign_out(&self, token: &AccessToken) -> Result<(), GatewayError> {
        self.check_reachable()?;
        let removed = self
            .access_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token.as_str());
        match removed {
            Some(user_id) => {
                self.refresh_tokens
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|_, uid| *uid != user_id);
                Ok(())
            }
            None => Err(GatewayError::Unauthorized("invalid token".into())),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, GatewayError> {
        self.check_reachable()?;
        let user_id = self
            .refresh_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(refresh_token)
            .ok_or_else(|| GatewayError::Unauthorized("invalid refresh token".into()))?;
        let user = self
            .user_by_id(&user_id)
            .ok_or_else(|| GatewayError::Unauthorized("user no longer exists".into()))?;
        let tokens = self.issue_tokens(&user);
        Ok(AuthResponse {
            user,
            tokens: Some(tokens),
        })
    }

    async fn get_user(&self, token: &AccessToken) -> Result<AuthUser, GatewayError> {
        self.check_reachable()?;
        let user_id = self
            .access_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token.as_str())
            .cloned()
            .ok_or_else(|| GatewayError::Unauthorized("invalid token".into()))?;
        self.user_by_id(&user_id)
            .ok_or_else(|| GatewayError::Unauthorized("user no longer exists".into()))
    }

    async fn admin_create_user(
        &self,
        _service: &AccessToken,
        email: &str,
        password: &str,
        metadata: &Value,
    ) -> Result<AuthUser, GatewayError> {
        self.check_reachable()?;
        self.create_account(email, password, metadata)
    }

    async fn admin_delete_user(
        &self,
        _service: &AccessToken,
        id: &str,
    ) -> Result<(), GatewayError> {
        self.check_reachable()?;
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let before = accounts.len();
        accounts.retain(|_, a| a.user.id != id);
        if accounts.len() == before {
            return Err(GatewayError::NotFound(format!("user {id}")));
        }
        drop(accounts);
        self.access_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, uid| uid != id);
        Ok(())
    }
}
