use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::GatewayError;

/// Named row collections on the hosted backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tasks,
    Columns,
    Projects,
    Profiles,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Columns => "columns",
            Collection::Projects => "projects",
            Collection::Profiles => "profiles",
            Collection::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Value rendered the way the row API expects it after `eq.`.
    pub fn value_text(&self) -> String {
        value_text(&self.value)
    }

    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(v) => value_text(v) == self.value_text(),
            None => self.value.is_null(),
        }
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Which result shape a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Rows,
    Count,
}

/// A read against one collection. An empty `select` means all columns,
/// which some backends narrow by default; callers that need a specific
/// column must name it.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub select: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub kind: QueryKind,
}

impl Query {
    pub fn rows(collection: Collection) -> Self {
        Self {
            collection,
            select: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            kind: QueryKind::Rows,
        }
    }

    pub fn count(collection: Collection) -> Self {
        Self {
            kind: QueryKind::Count,
            ..Self::rows(collection)
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn select_clause(&self) -> String {
        if self.select.is_empty() {
            "*".into()
        } else {
            self.select.join(",")
        }
    }
}

/// Result of a `Query`, tagged by the kind that was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Value>),
    Count(u64),
}

impl QueryResult {
    pub fn into_rows(self) -> Result<Vec<Value>, GatewayError> {
        match self {
            QueryResult::Rows(rows) => Ok(rows),
            QueryResult::Count(_) => Err(GatewayError::Shape(
                "expected rows, got a count".into(),
            )),
        }
    }

    pub fn into_count(self) -> Result<u64, GatewayError> {
        match self {
            QueryResult::Count(n) => Ok(n),
            QueryResult::Rows(_) => Err(GatewayError::Shape(
                "expected a count, got rows".into(),
            )),
        }
    }

    /// Decode rows into typed records.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Vec<T>, GatewayError> {
        decode_rows(self.into_rows()?)
    }
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, GatewayError> {
    rows.into_iter().map(decode_row).collect()
}

pub fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T, GatewayError> {
    serde_json::from_value(row).map_err(|e| GatewayError::Shape(format!("row decode: {e}")))
}
