//! Query-backed identity backend
//!
//! Every operation runs one administrator template (two for `set_password`,
//! which checks existence first). Templates that are not configured make
//! the operation unsupported rather than failing, and inputs that could
//! harm the database or hasher are rejected before a connection is taken.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use super::capabilities::Capabilities;
use super::database::{
    ConnectionProvider, DatabaseHandle, ErrorMode, QueryExecutor, QueryParams, ScalarValue,
};
use super::UserBackend;
use crate::config::{BackendConfiguration, QueryName};
use crate::critical;
use crate::error::{AppError, AppResult};
use crate::logging::{BACKEND_ID, LOG_TARGET};
use crate::password::{PasswordManager, MAX_PASSWORD_LENGTH};
use crate::utils::contains_pattern;

pub struct IdentityBackend {
    config: BackendConfiguration,
    provider: Arc<dyn ConnectionProvider>,
    /// Opened on first use, then shared by every operation.
    connection: OnceCell<Arc<dyn QueryExecutor>>,
    passwords: PasswordManager,
}

impl IdentityBackend {
    pub fn new(config: BackendConfiguration, provider: Arc<dyn ConnectionProvider>) -> Self {
        let passwords = PasswordManager::new(config.hash_algorithm());
        Self {
            config,
            provider,
            connection: OnceCell::new(),
            passwords,
        }
    }

    /// Connect with the database settings found in `config`.
    pub fn from_configuration(config: BackendConfiguration) -> Self {
        let provider = Arc::new(config.clone());
        Self::new(config, provider)
    }

    pub fn configuration(&self) -> &BackendConfiguration {
        &self.config
    }

    pub fn passwords(&self) -> &PasswordManager {
        &self.passwords
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Close the pooled connection if one was opened.
    pub async fn close(&self) {
        if let Some(executor) = self.connection.get() {
            executor.close().await;
        }
    }

    /// Hash with the configured algorithm, as `create_user` and
    /// `set_password` would.
    pub fn hash_password(&self, password: &str) -> AppResult<String> {
        check_length(password)?;
        self.passwords.hash_password(password)
    }

    fn template(&self, name: QueryName) -> AppResult<&str> {
        self.config
            .query(name)
            .ok_or(AppError::NotSupported(name.config_key()))
    }

    async fn handle(&self, mode: ErrorMode) -> AppResult<DatabaseHandle> {
        let executor = self
            .connection
            .get_or_try_init(|| self.provider.connect())
            .await?;
        Ok(DatabaseHandle::new(Arc::clone(executor), mode))
    }

    /// Log a failed operation. Unsupported operations were never attempted
    /// and only show up at debug level.
    fn report<T>(operation: &'static str, result: AppResult<T>) -> AppResult<T> {
        if let Err(err) = &result {
            match err {
                AppError::NotSupported(query) => debug!(
                    target: LOG_TARGET,
                    backend = BACKEND_ID,
                    operation,
                    "Query '{}' is not configured",
                    query
                ),
                AppError::Hashing(reason) => {
                    critical!(operation, "Could not hash password: {}", reason)
                }
                AppError::Configuration(reason) => critical!(operation, "{}", reason),
                other => error!(target: LOG_TARGET, backend = BACKEND_ID, operation, "{}", other),
            }
        }
        result
    }

    async fn check_password_inner(
        &self,
        username: &str,
        password: &str,
    ) -> AppResult<Option<String>> {
        if !self.capabilities().contains(Capabilities::CHECK_PASSWORD) {
            return Err(AppError::NotSupported("checkPassword"));
        }
        check_length(password)?;

        let sql = self.template(QueryName::GetPasswordHashForUser)?;
        let db = self.handle(ErrorMode::Redacted).await?;
        let params = QueryParams::new().text("username", username);

        let Some(stored) = db
            .fetch_scalar(sql, &params)
            .await?
            .and_then(ScalarValue::into_text)
        else {
            return Ok(None);
        };

        match self.passwords.verify_password(password, &stored) {
            Ok(true) => Ok(Some(username.to_string())),
            Ok(false) => Ok(None),
            Err(_) => {
                warn!(
                    target: LOG_TARGET,
                    backend = BACKEND_ID,
                    "Stored password hash for user '{}' is malformed",
                    username
                );
                Ok(None)
            }
        }
    }

    async fn user_exists_inner(&self, username: &str) -> AppResult<bool> {
        let sql = self.template(QueryName::UserExists)?;
        let db = self.handle(ErrorMode::Verbose).await?;
        let params = QueryParams::new().text("username", username);

        let value = db.fetch_scalar(sql, &params).await?;
        Ok(value.map_or(false, |v| v.is_truthy()))
    }

    async fn get_users_inner(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<String>> {
        let template = self.template(QueryName::GetUsers)?;
        let db = self.handle(ErrorMode::Verbose).await?;

        let sql = db.paginate(
            template.trim().trim_end_matches(';'),
            limit.is_some(),
            offset.is_some(),
        );
        let pattern = contains_pattern(search);
        let mut params = QueryParams::new()
            .text("username", pattern.clone())
            .text("search", pattern);

        if let Some(limit) = limit {
            params = params.int("limit", limit);
        }
        if let Some(offset) = offset {
            params = params.int("offset", offset);
        }

        let rows = db.fetch_column(&sql, &params).await?;
        Ok(rows.into_iter().filter_map(ScalarValue::into_text).collect())
    }

    async fn lookup_text(&self, name: QueryName, username: &str) -> AppResult<Option<String>> {
        let sql = self.template(name)?;
        let db = self.handle(ErrorMode::Verbose).await?;
        let params = QueryParams::new().text("username", username);

        Ok(db
            .fetch_scalar(sql, &params)
            .await?
            .and_then(ScalarValue::into_text))
    }

    async fn get_display_names_inner(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<(String, Option<String>)>> {
        self.template(QueryName::GetDisplayName)?;
        let users = self.get_users_inner(search, limit, offset).await?;

        // One lookup per user: the templates are opaque, so no join.
        let mut display_names = Vec::with_capacity(users.len());
        for user in users {
            let display_name = self.lookup_text(QueryName::GetDisplayName, &user).await?;
            display_names.push((user, display_name));
        }
        Ok(display_names)
    }

    async fn set_display_name_inner(&self, username: &str, display_name: &str) -> AppResult<()> {
        let sql = self.template(QueryName::SetDisplayName)?;
        let db = self.handle(ErrorMode::Verbose).await?;
        let params = QueryParams::new()
            .text("username", username)
            .text("new_display_name", display_name);

        // Zero affected rows still counts as success.
        db.execute(sql, &params).await?;
        Ok(())
    }

    async fn set_password_inner(&self, username: &str, password: &str) -> AppResult<()> {
        let sql = self.template(QueryName::SetPasswordForUser)?;
        check_length(password)?;

        if !self.user_exists_inner(username).await? {
            return Err(AppError::NotFound(username.to_string()));
        }

        let hash = self.passwords.hash_password(password)?;
        let db = self.handle(ErrorMode::Redacted).await?;
        let params = QueryParams::new()
            .text("username", username)
            .text("new_password_hash", hash);

        db.execute(sql, &params).await?;
        Ok(())
    }

    async fn count_users_inner(&self) -> AppResult<i64> {
        let sql = self.template(QueryName::CountUsers)?;
        let db = self.handle(ErrorMode::Verbose).await?;

        let value = db.fetch_scalar(sql, &QueryParams::new()).await?;
        Ok(value.and_then(|v| v.as_i64()).unwrap_or(0))
    }

    async fn create_user_inner(&self, username: &str, password: &str) -> AppResult<()> {
        let sql = self.template(QueryName::CreateUser)?;
        check_length(password)?;

        let hash = self.passwords.hash_password(password)?;
        let db = self.handle(ErrorMode::Redacted).await?;
        let params = QueryParams::new()
            .text("username", username)
            .text("password_hash", hash);

        db.execute(sql, &params).await?;
        Ok(())
    }

    async fn delete_user_inner(&self, username: &str) -> AppResult<()> {
        let sql = self.template(QueryName::DeleteUser)?;
        let db = self.handle(ErrorMode::Verbose).await?;

        db.execute(sql, &QueryParams::new().text("username", username))
            .await?;
        Ok(())
    }
}

fn check_length(password: &str) -> AppResult<()> {
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AppError::PasswordTooLong);
    }
    Ok(())
}

#[async_trait]
impl UserBackend for IdentityBackend {
    fn backend_name(&self) -> &'static str {
        "SQL raw"
    }

    /// Recomputed on every call from the configured templates.
    fn capabilities(&self) -> Capabilities {
        Capabilities::from_configuration(&self.config)
    }

    fn has_user_listings(&self) -> bool {
        self.config.has_query(QueryName::GetUsers)
    }

    async fn check_password(&self, username: &str, password: &str) -> AppResult<Option<String>> {
        Self::report(
            "checkPassword",
            self.check_password_inner(username, password).await,
        )
    }

    async fn user_exists(&self, username: &str) -> AppResult<bool> {
        Self::report("userExists", self.user_exists_inner(username).await)
    }

    async fn get_users(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<String>> {
        Self::report(
            "getUsers",
            self.get_users_inner(search, limit, offset).await,
        )
    }

    async fn get_display_name(&self, username: &str) -> AppResult<Option<String>> {
        Self::report(
            "getDisplayName",
            self.lookup_text(QueryName::GetDisplayName, username).await,
        )
    }

    async fn get_display_names(
        &self,
        search: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<(String, Option<String>)>> {
        Self::report(
            "getDisplayNames",
            self.get_display_names_inner(search, limit, offset).await,
        )
    }

    async fn set_display_name(&self, username: &str, display_name: &str) -> AppResult<()> {
        Self::report(
            "setDisplayName",
            self.set_display_name_inner(username, display_name).await,
        )
    }

    async fn set_password(&self, username: &str, password: &str) -> AppResult<()> {
        Self::report("setPassword", self.set_password_inner(username, password).await)
    }

    async fn count_users(&self) -> AppResult<i64> {
        Self::report("countUsers", self.count_users_inner().await)
    }

    async fn get_home(&self, username: &str) -> AppResult<Option<String>> {
        Self::report(
            "getHome",
            self.lookup_text(QueryName::GetHome, username).await,
        )
    }

    async fn create_user(&self, username: &str, password: &str) -> AppResult<()> {
        Self::report("createUser", self.create_user_inner(username, password).await)
    }

    async fn delete_user(&self, username: &str) -> AppResult<()> {
        Self::report("deleteUser", self.delete_user_inner(username).await)
    }

    async fn cleanup(&self) {
        self.close().await;
    }
}
