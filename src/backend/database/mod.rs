//! Database boundary for the query-backed backend
//!
//! Administrator templates use named `:placeholders`. They are rewritten to
//! the positional form of each dialect before execution and bound from a
//! `QueryParams` list.
//!
//! ```text
//! IdentityBackend
//!     ↓ DatabaseHandle (error mode scope)
//! QueryExecutor
//!     ├── postgres.rs (PostgreSQL via sqlx)
//!     └── sqlite.rs   (SQLite via sqlx)
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::{AppError, AppResult};

pub mod config;
pub mod placeholders;
pub mod postgres;
pub mod sqlite;

pub use config::DatabaseBackendConfig;
pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;

/// A value bound to a named placeholder.
#[derive(Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "Text({} bytes)", s.len()),
            ParamValue::Int(n) => write!(f, "Int({})", n),
        }
    }
}

/// Named parameters for one query execution, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    entries: Vec<(&'static str, ParamValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.entries.push((name, ParamValue::Text(value.into())));
        self
    }

    pub fn int(mut self, name: &'static str, value: i64) -> Self {
        self.entries.push((name, ParamValue::Int(value)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }
}

/// The first column of a result row, decoded loosely.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Loose truthiness: NULL, false, 0, 0.0, "" and "0" are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            ScalarValue::Null => false,
            ScalarValue::Bool(b) => *b,
            ScalarValue::Int(n) => *n != 0,
            ScalarValue::Float(x) => *x != 0.0,
            ScalarValue::Text(s) => !s.is_empty() && s != "0",
        }
    }

    /// Integer view; decimal text such as `"12.50"` is truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(b) => Some(i64::from(*b)),
            ScalarValue::Int(n) => Some(*n),
            ScalarValue::Float(x) => Some(*x as i64),
            ScalarValue::Text(s) => {
                let s = s.trim();
                s.parse()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|x| x.is_finite()).map(|x| x as i64))
            }
        }
    }

    /// Text rendering; `None` for NULL.
    pub fn into_text(self) -> Option<String> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(b) => Some(if b { "1".to_string() } else { String::new() }),
            ScalarValue::Int(n) => Some(n.to_string()),
            ScalarValue::Float(x) => Some(x.to_string()),
            ScalarValue::Text(s) => Some(s),
        }
    }
}

/// One open database handle able to run administrator templates.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// First column of the first row; `None` when no row matched.
    async fn fetch_scalar(&self, sql: &str, params: &QueryParams)
        -> AppResult<Option<ScalarValue>>;

    /// First column of every row, in the order the database returned them.
    async fn fetch_column(&self, sql: &str, params: &QueryParams) -> AppResult<Vec<ScalarValue>>;

    /// Run a statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &QueryParams) -> AppResult<u64>;

    /// Turn a template into a derived table that LIMIT/OFFSET can follow.
    fn wrap_subquery(&self, sql: &str) -> String {
        format!("({})", sql)
    }

    /// Wrap a listing template and append `:limit` / `:offset` clauses for
    /// the bounds that are present.
    fn paginate(&self, sql: &str, has_limit: bool, has_offset: bool) -> String {
        let mut paged = self.wrap_subquery(sql);
        if has_limit {
            paged.push_str(" LIMIT :limit");
        }
        if has_offset {
            paged.push_str(" OFFSET :offset");
        }
        paged
    }

    /// Release the underlying connection.
    async fn close(&self) {}
}

/// Source of the backend's database handle, asked at most once per backend.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self) -> AppResult<Arc<dyn QueryExecutor>>;
}

/// Provider for hosts that already hold an open connection.
pub struct SharedConnection(pub Arc<dyn QueryExecutor>);

#[async_trait]
impl ConnectionProvider for SharedConnection {
    async fn connect(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        Ok(Arc::clone(&self.0))
    }
}

/// How driver errors are surfaced for the statements run through a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Driver messages are kept.
    Verbose,
    /// Driver messages are dropped; used whenever a statement touches
    /// password material.
    Redacted,
}

/// An executor seen through an error mode. Handles are short-lived: one is
/// taken per operation, so the mode never leaks into other calls.
pub struct DatabaseHandle {
    executor: Arc<dyn QueryExecutor>,
    mode: ErrorMode,
}

impl DatabaseHandle {
    pub fn new(executor: Arc<dyn QueryExecutor>, mode: ErrorMode) -> Self {
        Self { executor, mode }
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    fn guard<T>(&self, result: AppResult<T>) -> AppResult<T> {
        match self.mode {
            ErrorMode::Verbose => result,
            ErrorMode::Redacted => result.map_err(AppError::redacted),
        }
    }

    pub async fn fetch_scalar(
        &self,
        sql: &str,
        params: &QueryParams,
    ) -> AppResult<Option<ScalarValue>> {
        self.guard(self.executor.fetch_scalar(sql, params).await)
    }

    pub async fn fetch_column(&self, sql: &str, params: &QueryParams) -> AppResult<Vec<ScalarValue>> {
        self.guard(self.executor.fetch_column(sql, params).await)
    }

    pub async fn execute(&self, sql: &str, params: &QueryParams) -> AppResult<u64> {
        self.guard(self.executor.execute(sql, params).await)
    }

    pub fn wrap_subquery(&self, sql: &str) -> String {
        self.executor.wrap_subquery(sql)
    }

    pub fn paginate(&self, sql: &str, has_limit: bool, has_offset: bool) -> String {
        self.executor.paginate(sql, has_limit, has_offset)
    }
}
