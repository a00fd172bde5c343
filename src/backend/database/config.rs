use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::{ConnectionProvider, PostgresExecutor, QueryExecutor, SqliteExecutor};
use crate::backend::DatabaseType;
use crate::config::{BackendConfiguration, DEFAULT_DB_HOST, DEFAULT_DB_PORT};
use crate::error::{AppError, AppResult};

/// Connection settings with defaults applied.
///
/// Built from `BackendConfiguration` on first use, so configuration defects
/// only surface when an operation actually needs the database.
#[derive(Clone)]
pub struct DatabaseBackendConfig {
    pub database_type: DatabaseType,

    pub host: String,

    pub port: u16,

    /// Database name, or file path / `:memory:` for SQLite
    pub database: String,

    pub username: String,

    pub password: Option<String>,

    /// One handle per backend instance
    pub max_connections: u32,

    /// Acquire timeout in seconds
    pub connection_timeout: u64,
}

impl DatabaseBackendConfig {
    pub fn new(database_type: DatabaseType, database: String) -> Self {
        Self {
            database_type,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database,
            username: String::new(),
            password: None,
            max_connections: 1,
            connection_timeout: 30,
        }
    }

    pub fn postgres(database: String) -> Self {
        Self::new(DatabaseType::PostgreSQL, database)
    }

    pub fn sqlite(path: String) -> Self {
        Self::new(DatabaseType::SQLite, path)
    }

    /// In-memory SQLite, for tests
    pub fn memory_sqlite() -> Self {
        Self::new(DatabaseType::SQLite, ":memory:".to_string())
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: String, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_connection_timeout(mut self, timeout_seconds: u64) -> Self {
        self.connection_timeout = timeout_seconds;
        self
    }

    pub fn is_memory_database(&self) -> bool {
        self.database == ":memory:"
    }

    /// Apply the documented defaults to the raw configuration values.
    pub fn from_configuration(config: &BackendConfiguration) -> AppResult<Self> {
        let database_type = DatabaseType::from_driver(config.db_driver())?;
        let database = non_empty(config.db_name()).unwrap_or_default().to_string();

        let host = non_empty(config.db_host()).unwrap_or(DEFAULT_DB_HOST).to_string();
        let port = match non_empty(config.db_port()) {
            Some(port) => port.trim().parse::<u16>().map_err(|_| {
                AppError::Configuration(format!("dbPort '{}' is not a valid port", port))
            })?,
            None => DEFAULT_DB_PORT,
        };

        let password = match (non_empty(config.db_password()), non_empty(config.db_password_file())) {
            (Some(password), _) => Some(password.to_string()),
            (None, Some(path)) => Some(read_password_file(path)?),
            (None, None) => None,
        };
        let username = non_empty(config.db_user()).unwrap_or_default().to_string();

        Ok(Self::new(database_type, database)
            .with_host(host)
            .with_port(port)
            .with_credentials(username, password))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database.trim().is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("Max connections must be greater than 0".to_string());
        }

        if self.database_type == DatabaseType::PostgreSQL && self.username.is_empty() {
            return Err("PostgreSQL requires a database user".to_string());
        }

        Ok(())
    }

    pub async fn open(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.validate().map_err(AppError::Configuration)?;

        let executor: Arc<dyn QueryExecutor> = match self.database_type {
            DatabaseType::PostgreSQL => Arc::new(PostgresExecutor::connect(self).await?),
            DatabaseType::SQLite => Arc::new(SqliteExecutor::connect(self).await?),
        };
        Ok(executor)
    }
}

impl fmt::Debug for DatabaseBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBackendConfig")
            .field("database_type", &self.database_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

impl Default for DatabaseBackendConfig {
    fn default() -> Self {
        Self::memory_sqlite()
    }
}

#[async_trait]
impl ConnectionProvider for DatabaseBackendConfig {
    async fn connect(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.open().await
    }
}

/// The backend configuration connects through the settings it describes.
#[async_trait]
impl ConnectionProvider for BackendConfiguration {
    async fn connect(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        DatabaseBackendConfig::from_configuration(self)?.open().await
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_password_file(path: &str) -> AppResult<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Configuration(format!("Failed to read dbPasswordFile {}: {}", path, e))
    })?;
    Ok(content.trim_end_matches(['\r', '\n']).to_string())
}
