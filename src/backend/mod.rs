use async_trait::async_trait;

use crate::error::{AppError, AppResult};

pub mod capabilities;
pub mod database;
pub mod identity;

pub use capabilities::Capabilities;
pub use identity::IdentityBackend;

/// Supported database backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Map the `dbDriver` setting; unset means PostgreSQL.
    pub fn from_driver(driver: Option<&str>) -> AppResult<Self> {
        match driver.map(|d| d.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("pgsql") | Some("postgres") | Some("postgresql") => {
                Ok(DatabaseType::PostgreSQL)
            }
            Some("sqlite") | Some("sqlite3") => Ok(DatabaseType::SQLite),
            Some(other) => Err(AppError::Configuration(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }
}

/// The account interface a host consumes.
///
/// Optional operations are advertised through `capabilities`; calling one
/// whose template is not configured yields `AppError::NotSupported` without
/// touching the database.
#[async_trait]
pub trait UserBackend: Send + Sync {
    /// Name the host shows for this backend
    fn backend_name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Whether any of the requested actions is supported
    fn implements_actions(&self, actions: Capabilities) -> bool {
        self.capabilities().intersects(actions)
    }

    /// Whether the backend can enumerate users
    fn has_user_listings(&self) -> bool;

    /// The username on success, `None` on a wrong password or unknown user
    async fn check_password(&self, username: &str, password: &str) -> AppResult<Option<String>>;

    async fn user_exists(&self, username: &str) -> AppResult<bool>;

    /// Usernames containing `search`, in database order
    async fn get_users(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<String>>;

    async fn get_display_name(&self, username: &str) -> AppResult<Option<String>>;

    /// `(username, display name)` pairs in `get_users` order
    async fn get_display_names(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<(String, Option<String>)>>;

    async fn set_display_name(&self, username: &str, display_name: &str) -> AppResult<()>;

    async fn set_password(&self, username: &str, password: &str) -> AppResult<()>;

    async fn count_users(&self) -> AppResult<i64>;

    async fn get_home(&self, username: &str) -> AppResult<Option<String>>;

    async fn create_user(&self, username: &str, password: &str) -> AppResult<()>;

    async fn delete_user(&self, username: &str) -> AppResult<()>;

    /// Release resources held by the backend
    async fn cleanup(&self) {}
}
