use sql_user_backend::backend::database::{
    DatabaseBackendConfig, QueryExecutor, QueryParams, SharedConnection,
};
use sql_user_backend::backend::IdentityBackend;
use sql_user_backend::config::{BackendConfiguration, HostConfig, QueryTemplates, RawBackendSection};
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestDatabaseType {
    Sqlite,
    Postgres,
}

/// A database with an empty users table. The container, when there is one,
/// is stopped on drop.
pub struct TestDatabase {
    pub database_type: TestDatabaseType,
    pub executor: Arc<dyn QueryExecutor>,
    pub postgres_container: Option<ContainerAsync<Postgres>>,
}

impl TestDatabase {
    /// `None` when no PostgreSQL container can be started (e.g. Docker is
    /// not available); SQLite always starts.
    pub async fn start(database_type: TestDatabaseType) -> Option<Self> {
        match database_type {
            TestDatabaseType::Sqlite => Some(Self {
                database_type,
                executor: setup_test_database().await.unwrap(),
                postgres_container: None,
            }),
            TestDatabaseType::Postgres => match setup_postgres_test_database().await {
                Ok((executor, container)) => Some(Self {
                    database_type,
                    executor,
                    postgres_container: Some(container),
                }),
                Err(e) => {
                    eprintln!("Skipping PostgreSQL test, no container: {}", e);
                    None
                }
            },
        }
    }

    /// Backend sharing this database's connection.
    pub fn backend(&self, queries: QueryTemplates, hash_algorithm: Option<&str>) -> IdentityBackend {
        IdentityBackend::new(
            test_configuration(self.database_type, queries, hash_algorithm),
            Arc::new(SharedConnection(self.executor.clone())),
        )
    }
}

pub const CREATE_USERS_TABLE: &str = "CREATE TABLE users (
    username TEXT PRIMARY KEY,
    password_hash TEXT,
    display_name TEXT,
    home TEXT
)";

/// Templates covering every operation, valid on SQLite and PostgreSQL.
pub fn user_queries() -> QueryTemplates {
    QueryTemplates {
        get_password_hash_for_user: Some(
            "SELECT password_hash FROM users WHERE username = :username".to_string(),
        ),
        user_exists: Some(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = :username)".to_string(),
        ),
        create_user: Some(
            "INSERT INTO users (username, password_hash) VALUES (:username, :password_hash)"
                .to_string(),
        ),
        delete_user: Some("DELETE FROM users WHERE username = :username".to_string()),
        set_password_for_user: Some(
            "UPDATE users SET password_hash = :new_password_hash WHERE username = :username"
                .to_string(),
        ),
        get_home: Some("SELECT home FROM users WHERE username = :username".to_string()),
        get_display_name: Some(
            "SELECT display_name FROM users WHERE username = :username".to_string(),
        ),
        set_display_name: Some(
            "UPDATE users SET display_name = :new_display_name WHERE username = :username"
                .to_string(),
        ),
        count_users: Some("SELECT COUNT(*) FROM users".to_string()),
        get_users: Some(
            "SELECT username FROM users WHERE username LIKE :search ESCAPE '\\' ORDER BY username"
                .to_string(),
        ),
    }
}

pub fn test_configuration(
    database_type: TestDatabaseType,
    queries: QueryTemplates,
    hash_algorithm: Option<&str>,
) -> BackendConfiguration {
    let section = match database_type {
        TestDatabaseType::Sqlite => RawBackendSection {
            db_driver: Some("sqlite".to_string()),
            db_name: Some(":memory:".to_string()),
            ..Default::default()
        },
        TestDatabaseType::Postgres => RawBackendSection {
            db_driver: Some("pgsql".to_string()),
            db_name: Some("postgres".to_string()),
            db_user: Some("postgres".to_string()),
            db_password: Some("postgres".to_string()),
            ..Default::default()
        },
    };
    BackendConfiguration::new(HostConfig {
        backend: Some(RawBackendSection {
            queries,
            hash_algorithm: hash_algorithm.map(str::to_string),
            ..section
        }),
    })
}

/// Open an in-memory database with an empty users table.
pub async fn setup_test_database() -> Result<Arc<dyn QueryExecutor>, Box<dyn std::error::Error>> {
    let executor = DatabaseBackendConfig::memory_sqlite().open().await?;
    executor.execute(CREATE_USERS_TABLE, &QueryParams::new()).await?;
    Ok(executor)
}

/// Start a PostgreSQL container and create the users table in it.
pub async fn setup_postgres_test_database(
) -> Result<(Arc<dyn QueryExecutor>, ContainerAsync<Postgres>), Box<dyn std::error::Error>> {
    let container = Postgres::default().start().await?;
    let port = container.get_host_port_ipv4(5432).await?;

    let executor = DatabaseBackendConfig::postgres("postgres".to_string())
        .with_host("127.0.0.1".to_string())
        .with_port(port)
        .with_credentials("postgres".to_string(), Some("postgres".to_string()))
        .open()
        .await?;
    executor.execute(CREATE_USERS_TABLE, &QueryParams::new()).await?;
    Ok((executor, container))
}

/// Backend over a fresh in-memory database, plus the executor for setup.
pub async fn setup_test_backend(
    queries: QueryTemplates,
    hash_algorithm: Option<&str>,
) -> Result<(IdentityBackend, Arc<dyn QueryExecutor>), Box<dyn std::error::Error>> {
    let executor = setup_test_database().await?;
    let backend = IdentityBackend::new(
        test_configuration(TestDatabaseType::Sqlite, queries, hash_algorithm),
        Arc::new(SharedConnection(executor.clone())),
    );
    Ok((backend, executor))
}

/// Insert a row directly, bypassing the backend.
pub async fn insert_user(
    executor: &Arc<dyn QueryExecutor>,
    username: &str,
    password_hash: Option<&str>,
    display_name: Option<&str>,
    home: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    // NULL columns are written by omitting them from the insert.
    let mut columns = vec!["username"];
    let mut values = vec![":username"];
    let mut params = QueryParams::new().text("username", username);

    if let Some(hash) = password_hash {
        columns.push("password_hash");
        values.push(":password_hash");
        params = params.text("password_hash", hash);
    }
    if let Some(name) = display_name {
        columns.push("display_name");
        values.push(":display_name");
        params = params.text("display_name", name);
    }
    if let Some(home) = home {
        columns.push("home");
        values.push(":home");
        params = params.text("home", home);
    }

    let sql = format!(
        "INSERT INTO users ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    );
    executor.execute(&sql, &params).await?;
    Ok(())
}
