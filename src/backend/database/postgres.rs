use async_trait::async_trait;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Executor, PgPool, Postgres, Row, Statement, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::debug;

use super::config::DatabaseBackendConfig;
use super::placeholders::{bind_named, bind_named_with_casts, BoundQuery, PlaceholderStyle};
use super::{ParamValue, QueryExecutor, QueryParams, ScalarValue};
use crate::error::{AppError, AppResult};
use crate::logging::LOG_TARGET;

/// Types whose values travel as UTF-8 text on the wire.
const TEXT_TYPES: &[&str] = &["TEXT", "VARCHAR", "BPCHAR", "NAME", "CITEXT", "UNKNOWN"];

fn is_text_type(name: &str) -> bool {
    TEXT_TYPES.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Cast a placeholder needs when the server inferred a type other than the
/// one the value is sent as. Text reaches any type through its input
/// function.
pub(crate) fn placeholder_cast(value: &ParamValue, inferred: &str) -> Option<String> {
    let compatible = match value {
        ParamValue::Text(_) => is_text_type(inferred),
        ParamValue::Int(_) => inferred.eq_ignore_ascii_case("INT8"),
    };
    (!compatible).then(|| inferred.to_string())
}

/// PostgreSQL executor over a sqlx pool.
///
/// Templates compare usernames against columns of any type, so parameter
/// types are left for the server to infer and values are cast to them.
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username);
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect_with(options)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Rewrite a template and cast each placeholder to the type the server
    /// infers for it. When inference fails the plain rewrite is used and the
    /// server reports any real problem on execution.
    async fn bind<'p>(&self, sql: &str, params: &'p QueryParams) -> AppResult<BoundQuery<'p>> {
        let bound = bind_named(sql, params, PlaceholderStyle::Dollar)?;
        if bound.values.is_empty() {
            return Ok(bound);
        }

        let inferred: Vec<String> = match self.pool.prepare(bound.sql.as_str()).await {
            Ok(statement) => match statement.parameters().and_then(|p| p.left()) {
                Some(types) => types.iter().map(|t| t.name().to_string()).collect(),
                None => return Ok(bound),
            },
            Err(e) => {
                debug!(
                    target: LOG_TARGET,
                    error = %e,
                    "Parameter types not inferred; binding as sent"
                );
                return Ok(bound);
            }
        };

        let casts: Vec<Option<String>> = bound
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                inferred
                    .get(i)
                    .and_then(|name| placeholder_cast(value, name))
            })
            .collect();
        if casts.iter().all(Option::is_none) {
            return Ok(bound);
        }
        bind_named_with_casts(sql, params, &casts)
    }

    fn build<'q>(bound: &'q BoundQuery<'q>) -> Query<'q, Postgres, PgArguments> {
        bound
            .values
            .iter()
            .fold(sqlx::query(&bound.sql), |query, value| match value {
                ParamValue::Text(s) => query.bind(s.as_str()),
                ParamValue::Int(n) => query.bind(*n),
            })
    }

    fn decode_first_column(row: &PgRow) -> AppResult<ScalarValue> {
        let raw = row.try_get_raw(0)?;
        if raw.is_null() {
            return Ok(ScalarValue::Null);
        }
        let declared = raw.type_info().into_owned();
        // Domains decode as their base type.
        let type_info = match declared.kind() {
            PgTypeKind::Domain(base) => base.clone(),
            _ => declared,
        };
        if let PgTypeKind::Enum(_) = type_info.kind() {
            return Ok(ScalarValue::Text(row.try_get_unchecked(0)?));
        }
        let type_name = type_info.name().to_ascii_uppercase();

        let value = match type_name.as_str() {
            "BOOL" => ScalarValue::Bool(row.try_get_unchecked(0)?),
            "INT2" => ScalarValue::Int(row.try_get_unchecked::<i16, _>(0)?.into()),
            "INT4" => ScalarValue::Int(row.try_get_unchecked::<i32, _>(0)?.into()),
            "INT8" => ScalarValue::Int(row.try_get_unchecked(0)?),
            "OID" => ScalarValue::Int(row.try_get_unchecked::<Oid, _>(0)?.0.into()),
            "FLOAT4" => ScalarValue::Float(row.try_get_unchecked::<f32, _>(0)?.into()),
            "FLOAT8" => ScalarValue::Float(row.try_get_unchecked(0)?),
            "NUMERIC" => ScalarValue::Text(row.try_get_unchecked::<Decimal, _>(0)?.to_string()),
            "UUID" => ScalarValue::Text(row.try_get_unchecked::<Uuid, _>(0)?.to_string()),
            "DATE" => ScalarValue::Text(row.try_get_unchecked::<NaiveDate, _>(0)?.to_string()),
            "TIME" => ScalarValue::Text(row.try_get_unchecked::<NaiveTime, _>(0)?.to_string()),
            "TIMESTAMP" => {
                ScalarValue::Text(row.try_get_unchecked::<NaiveDateTime, _>(0)?.to_string())
            }
            "TIMESTAMPTZ" => {
                ScalarValue::Text(row.try_get_unchecked::<DateTime<Utc>, _>(0)?.to_rfc3339())
            }
            "JSON" | "JSONB" => {
                ScalarValue::Text(row.try_get_unchecked::<JsonValue, _>(0)?.to_string())
            }
            name if is_text_type(name) => ScalarValue::Text(row.try_get_unchecked(0)?),
            other => {
                return Err(AppError::Query(format!(
                    "column type {} is not supported; cast it to text in the query",
                    other
                )))
            }
        };
        Ok(value)
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn fetch_scalar(
        &self,
        sql: &str,
        params: &QueryParams,
    ) -> AppResult<Option<ScalarValue>> {
        let bound = self.bind(sql, params).await?;
        let row = Self::build(&bound).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::decode_first_column).transpose()
    }

    async fn fetch_column(&self, sql: &str, params: &QueryParams) -> AppResult<Vec<ScalarValue>> {
        let bound = self.bind(sql, params).await?;
        let rows = Self::build(&bound).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_first_column).collect()
    }

    async fn execute(&self, sql: &str, params: &QueryParams) -> AppResult<u64> {
        let bound = self.bind(sql, params).await?;
        let result = Self::build(&bound).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
