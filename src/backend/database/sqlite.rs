use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;

use super::config::DatabaseBackendConfig;
use super::placeholders::{bind_named, BoundQuery, PlaceholderStyle};
use super::{ParamValue, QueryExecutor, QueryParams, ScalarValue};
use crate::error::{AppError, AppResult};

/// SQLite executor over a sqlx pool.
///
/// SQLite rejects a parenthesised SELECT followed by LIMIT, so templates are
/// wrapped as a derived table instead.
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        let options = if config.is_memory_database() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| AppError::Configuration(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database)
                .create_if_missing(true)
        };

        // An in-memory database lives as long as its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to open SQLite database: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn build<'q>(bound: &'q BoundQuery<'q>) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        bound
            .values
            .iter()
            .fold(sqlx::query(&bound.sql), |query, value| match value {
                ParamValue::Text(s) => query.bind(s.as_str()),
                ParamValue::Int(n) => query.bind(*n),
            })
    }

    fn decode_first_column(row: &SqliteRow) -> AppResult<ScalarValue> {
        let raw = row.try_get_raw(0)?;
        if raw.is_null() {
            return Ok(ScalarValue::Null);
        }
        let type_name = raw.type_info().name().to_string();

        let value = match type_name.as_str() {
            "INTEGER" => ScalarValue::Int(row.try_get(0)?),
            "BOOLEAN" => ScalarValue::Bool(row.try_get(0)?),
            "REAL" => ScalarValue::Float(row.try_get(0)?),
            "BLOB" => {
                let bytes: Vec<u8> = row.try_get(0)?;
                ScalarValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => ScalarValue::Text(row.try_get(0)?),
        };
        Ok(value)
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn fetch_scalar(
        &self,
        sql: &str,
        params: &QueryParams,
    ) -> AppResult<Option<ScalarValue>> {
        let bound = bind_named(sql, params, PlaceholderStyle::Question)?;
        let row = Self::build(&bound).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_first_column).transpose()
    }

    async fn fetch_column(&self, sql: &str, params: &QueryParams) -> AppResult<Vec<ScalarValue>> {
        let bound = bind_named(sql, params, PlaceholderStyle::Question)?;
        let rows = Self::build(&bound).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_first_column).collect()
    }

    async fn execute(&self, sql: &str, params: &QueryParams) -> AppResult<u64> {
        let bound = bind_named(sql, params, PlaceholderStyle::Question)?;
        let result = Self::build(&bound).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn wrap_subquery(&self, sql: &str) -> String {
        format!("SELECT * FROM ({})", sql)
    }

    /// SQLite only parses OFFSET after a LIMIT; `LIMIT -1` means unbounded.
    fn paginate(&self, sql: &str, has_limit: bool, has_offset: bool) -> String {
        let mut paged = self.wrap_subquery(sql);
        match (has_limit, has_offset) {
            (true, _) => paged.push_str(" LIMIT :limit"),
            (false, true) => paged.push_str(" LIMIT -1"),
            (false, false) => {}
        }
        if has_offset {
            paged.push_str(" OFFSET :offset");
        }
        paged
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
