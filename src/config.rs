use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::backend::DatabaseType;
use crate::critical;
use crate::logging::{BACKEND_ID, LOG_TARGET};

/// Key of the configuration block this backend reads.
pub const CONFIG_KEY: &str = "user_backend_sql_raw";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;

/// The administrator-defined query templates, by the operation they back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryName {
    GetPasswordHashForUser,
    UserExists,
    CreateUser,
    DeleteUser,
    SetPasswordForUser,
    GetHome,
    GetDisplayName,
    SetDisplayName,
    CountUsers,
    GetUsers,
}

impl QueryName {
    pub const ALL: [QueryName; 10] = [
        QueryName::GetPasswordHashForUser,
        QueryName::UserExists,
        QueryName::CreateUser,
        QueryName::DeleteUser,
        QueryName::SetPasswordForUser,
        QueryName::GetHome,
        QueryName::GetDisplayName,
        QueryName::SetDisplayName,
        QueryName::CountUsers,
        QueryName::GetUsers,
    ];

    /// Key of this template below `queries` in the configuration block.
    pub fn config_key(self) -> &'static str {
        match self {
            QueryName::GetPasswordHashForUser => "getPasswordHashForUser",
            QueryName::UserExists => "userExists",
            QueryName::CreateUser => "createUser",
            QueryName::DeleteUser => "deleteUser",
            QueryName::SetPasswordForUser => "setPasswordForUser",
            QueryName::GetHome => "getHome",
            QueryName::GetDisplayName => "getDisplayName",
            QueryName::SetDisplayName => "setDisplayName",
            QueryName::CountUsers => "countUsers",
            QueryName::GetUsers => "getUsers",
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// A value that YAML authors write either as a number or as a string.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScalarSetting {
    Number(i64),
    Text(String),
}

impl ScalarSetting {
    fn into_string(self) -> String {
        match self {
            ScalarSetting::Number(n) => n.to_string(),
            ScalarSetting::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryTemplates {
    pub get_password_hash_for_user: Option<String>,
    pub user_exists: Option<String>,
    pub create_user: Option<String>,
    pub delete_user: Option<String>,
    pub set_password_for_user: Option<String>,
    pub get_home: Option<String>,
    pub get_display_name: Option<String>,
    pub set_display_name: Option<String>,
    pub count_users: Option<String>,
    pub get_users: Option<String>,
}

impl QueryTemplates {
    fn raw(&self, name: QueryName) -> Option<&str> {
        let value = match name {
            QueryName::GetPasswordHashForUser => &self.get_password_hash_for_user,
            QueryName::UserExists => &self.user_exists,
            QueryName::CreateUser => &self.create_user,
            QueryName::DeleteUser => &self.delete_user,
            QueryName::SetPasswordForUser => &self.set_password_for_user,
            QueryName::GetHome => &self.get_home,
            QueryName::GetDisplayName => &self.get_display_name,
            QueryName::SetDisplayName => &self.set_display_name,
            QueryName::CountUsers => &self.count_users,
            QueryName::GetUsers => &self.get_users,
        };
        value.as_deref()
    }
}

/// The backend block exactly as written by the administrator.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawBackendSection {
    pub db_driver: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<ScalarSetting>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_password_file: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: QueryTemplates,
    pub hash_algorithm: Option<String>,
}

/// Top-level host configuration; only our block is read, other keys are ignored.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HostConfig {
    #[serde(rename = "user_backend_sql_raw")]
    pub backend: Option<RawBackendSection>,
}

/// Typed, read-only view over the backend configuration.
///
/// Getters hand back what the administrator wrote, possibly empty. The
/// documented host and port defaults are applied only when connection
/// settings are built (see `DatabaseBackendConfig`).
#[derive(Debug, Clone, Default)]
pub struct BackendConfiguration {
    section: Option<RawBackendSection>,
    db_port: Option<String>,
}

impl BackendConfiguration {
    /// Build the view and log every defect found. Never fails.
    pub fn new(host: HostConfig) -> Self {
        let Some(mut section) = host.backend else {
            critical!(
                "The configuration key '{}' is missing; the backend has no capabilities",
                CONFIG_KEY
            );
            return Self::default();
        };

        let db_port = section.db_port.take().map(ScalarSetting::into_string);
        let config = Self {
            section: Some(section),
            db_port,
        };
        config.report_defects();
        config
    }

    /// Parse YAML text, expanding `${VAR}` and `${VAR:-default}` first.
    pub fn from_yaml_str(content: &str) -> Result<Self, String> {
        let expanded = Self::expand_env_vars(content)?;
        let host: HostConfig = if expanded.trim().is_empty() {
            HostConfig::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| format!("Failed to parse configuration: {}", e))?
        };
        Ok(Self::new(host))
    }

    /// Read a YAML file. Only unreadable or malformed files are errors;
    /// missing keys are logged.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, String> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(format!("Configuration file not found: {}", path.display()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        Self::from_yaml_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
    }

    fn report_defects(&self) {
        if self.db_host().is_none() {
            info!(
                target: LOG_TARGET,
                backend = BACKEND_ID,
                "The config key 'dbHost' is not set, defaulting to '{}'",
                DEFAULT_DB_HOST
            );
        }
        if self.db_port().is_none() {
            info!(
                target: LOG_TARGET,
                backend = BACKEND_ID,
                "The config key 'dbPort' is not set, defaulting to {}",
                DEFAULT_DB_PORT
            );
        }
        if is_blank(self.db_name()) {
            critical!("The config key 'dbName' is not set");
        }
        if self.is_sqlite() {
            return;
        }
        if is_blank(self.db_user()) {
            critical!("The config key 'dbUser' is not set");
        }
        if is_blank(self.db_password()) && is_blank(self.db_password_file()) {
            critical!("The config key 'dbPassword' is not set");
        }
    }

    fn section(&self) -> Option<&RawBackendSection> {
        self.section.as_ref()
    }

    /// Whether the top-level block was present at all.
    pub fn is_present(&self) -> bool {
        self.section.is_some()
    }

    pub fn db_driver(&self) -> Option<&str> {
        self.section()?.db_driver.as_deref()
    }

    pub fn db_host(&self) -> Option<&str> {
        self.section()?.db_host.as_deref()
    }

    pub fn db_port(&self) -> Option<&str> {
        self.db_port.as_deref()
    }

    pub fn db_name(&self) -> Option<&str> {
        self.section()?.db_name.as_deref()
    }

    pub fn db_user(&self) -> Option<&str> {
        self.section()?.db_user.as_deref()
    }

    pub fn db_password(&self) -> Option<&str> {
        self.section()?.db_password.as_deref()
    }

    pub fn db_password_file(&self) -> Option<&str> {
        self.section()?.db_password_file.as_deref()
    }

    pub fn hash_algorithm(&self) -> Option<&str> {
        self.section()?.hash_algorithm.as_deref()
    }

    /// The raw template for `name`, possibly empty.
    pub fn raw_query(&self, name: QueryName) -> Option<&str> {
        self.section()?.queries.raw(name)
    }

    /// The template for `name` when it is configured and not blank.
    pub fn query(&self, name: QueryName) -> Option<&str> {
        self.raw_query(name).filter(|q| !q.trim().is_empty())
    }

    pub fn has_query(&self, name: QueryName) -> bool {
        self.query(name).is_some()
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(
            DatabaseType::from_driver(self.db_driver()),
            Ok(DatabaseType::SQLite)
        )
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let mut expanded = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                break;
            };
            expanded.push_str(&rest[..start]);

            let var_expr = &rest[start + 2..start + 2 + len];
            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            match (std::env::var(var_name), default_value) {
                (Ok(value), _) => expanded.push_str(&value),
                (Err(_), Some(default)) => expanded.push_str(default),
                (Err(_), None) => {
                    return Err(format!(
                        "Environment variable {} not found and no default provided",
                        var_name
                    ))
                }
            }

            rest = &rest[start + 2 + len + 1..];
        }

        expanded.push_str(rest);
        Ok(expanded)
    }
}

/// An empty `queries:` key reads as no templates.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::EventCapture;
    use tracing::Level;

    fn parse_capturing(yaml: &str) -> (BackendConfiguration, EventCapture) {
        let capture = EventCapture::default();
        let config = tracing::subscriber::with_default(capture.subscriber(), || {
            BackendConfiguration::from_yaml_str(yaml).unwrap()
        });
        (config, capture)
    }

    const FULL_CONFIG: &str = r#"
user_backend_sql_raw:
  dbHost: db.example.com
  dbPort: 6432
  dbName: users
  dbUser: nextcloud
  dbPassword: secret
  queries:
    getPasswordHashForUser: SELECT password_hash FROM users WHERE username = :username
    userExists: SELECT EXISTS(SELECT 1 FROM users WHERE username = :username)
    getUsers: SELECT username FROM users WHERE username ILIKE :search ORDER BY username
    getHome: ""
  hashAlgorithm: argon2i
"#;

    #[test]
    fn test_full_config_getters() {
        let config = BackendConfiguration::from_yaml_str(FULL_CONFIG).unwrap();

        assert!(config.is_present());
        assert_eq!(config.db_host(), Some("db.example.com"));
        assert_eq!(config.db_port(), Some("6432"));
        assert_eq!(config.db_name(), Some("users"));
        assert_eq!(config.db_user(), Some("nextcloud"));
        assert_eq!(config.db_password(), Some("secret"));
        assert_eq!(config.hash_algorithm(), Some("argon2i"));
        assert!(config.has_query(QueryName::UserExists));
        assert!(!config.has_query(QueryName::CreateUser));
    }

    #[test]
    fn test_empty_template_is_absent() {
        let config = BackendConfiguration::from_yaml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.raw_query(QueryName::GetHome), Some(""));
        assert_eq!(config.query(QueryName::GetHome), None);
        assert!(!config.has_query(QueryName::GetHome));
    }

    #[test]
    fn test_defaults_not_substituted() {
        let yaml = "user_backend_sql_raw:\n  dbName: users\n  dbUser: u\n  dbPassword: p\n";
        let config = BackendConfiguration::from_yaml_str(yaml).unwrap();

        assert_eq!(config.db_host(), None);
        assert_eq!(config.db_port(), None);
    }

    #[test]
    fn test_port_as_string() {
        let yaml = "user_backend_sql_raw:\n  dbPort: \"5433\"\n";
        let config = BackendConfiguration::from_yaml_str(yaml).unwrap();
        assert_eq!(config.db_port(), Some("5433"));
    }

    #[test]
    fn test_missing_block() {
        let config = BackendConfiguration::from_yaml_str("other_app:\n  key: value\n").unwrap();

        assert!(!config.is_present());
        assert_eq!(config.db_name(), None);
        assert_eq!(config.hash_algorithm(), None);
        for name in QueryName::ALL {
            assert!(!config.has_query(name));
        }
    }

    #[test]
    fn test_empty_document() {
        let config = BackendConfiguration::from_yaml_str("").unwrap();
        assert!(!config.is_present());
    }

    #[test]
    fn test_sqlite_driver() {
        let yaml = "user_backend_sql_raw:\n  dbDriver: SQLite\n  dbName: ':memory:'\n";
        let config = BackendConfiguration::from_yaml_str(yaml).unwrap();
        assert!(config.is_sqlite());
        assert_eq!(config.db_name(), Some(":memory:"));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("SQL_USER_BACKEND_TEST_PASSWORD", "from_env");

        let yaml = "user_backend_sql_raw:\n  dbPassword: ${SQL_USER_BACKEND_TEST_PASSWORD}\n  dbHost: ${SQL_USER_BACKEND_MISSING:-fallback.local}\n";
        let config = BackendConfiguration::from_yaml_str(yaml).unwrap();

        assert_eq!(config.db_password(), Some("from_env"));
        assert_eq!(config.db_host(), Some("fallback.local"));

        std::env::remove_var("SQL_USER_BACKEND_TEST_PASSWORD");
    }

    #[test]
    fn test_env_var_without_default() {
        let result = BackendConfiguration::expand_env_vars("x: ${SQL_USER_BACKEND_UNSET_VAR}");
        assert!(result.unwrap_err().contains("SQL_USER_BACKEND_UNSET_VAR"));
    }

    #[test]
    fn test_unterminated_expression_is_literal() {
        let expanded = BackendConfiguration::expand_env_vars("a: ${b").unwrap();
        assert_eq!(expanded, "a: ${b");
    }

    #[test]
    fn test_missing_config_file() {
        let result = BackendConfiguration::load_from_file("/nonexistent/path/config.yaml");
        assert!(result.unwrap_err().contains("Configuration file not found"));
    }

    #[test]
    fn test_invalid_yaml() {
        let temp_file = std::env::temp_dir().join("sql_user_backend_invalid_config.yaml");
        std::fs::write(&temp_file, "invalid: yaml: content: [").unwrap();

        let result = BackendConfiguration::load_from_file(&temp_file);
        assert!(result.unwrap_err().contains("Failed to parse config file"));

        std::fs::remove_file(&temp_file).unwrap();
    }

    #[test]
    fn test_query_name_keys() {
        assert_eq!(QueryName::GetPasswordHashForUser.to_string(), "getPasswordHashForUser");
        assert_eq!(QueryName::SetPasswordForUser.config_key(), "setPasswordForUser");
    }

    #[test]
    fn test_missing_block_logged_once_as_critical() {
        let (_, capture) = parse_capturing("other_app:\n  key: value\n");

        let critical = capture.critical();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].message.contains("user_backend_sql_raw"));
    }

    #[test]
    fn test_missing_credentials_logged_as_critical() {
        let (_, capture) = parse_capturing("user_backend_sql_raw:\n  dbHost: db\n  dbPort: 5432\n");

        let messages: Vec<String> = capture.critical().into_iter().map(|e| e.message).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.contains("'dbName'")));
        assert!(messages.iter().any(|m| m.contains("'dbUser'")));
        assert!(messages.iter().any(|m| m.contains("'dbPassword'")));
    }

    #[test]
    fn test_password_file_satisfies_password_check() {
        let yaml = "user_backend_sql_raw:\n  dbHost: db\n  dbPort: 5432\n  dbName: users\n  dbUser: u\n  dbPasswordFile: /run/secrets/db\n";
        let (_, capture) = parse_capturing(yaml);
        assert!(capture.critical().is_empty());
    }

    #[test]
    fn test_sqlite_only_requires_name() {
        let (_, capture) = parse_capturing("user_backend_sql_raw:\n  dbDriver: sqlite\n");

        let critical = capture.critical();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].message.contains("'dbName'"));
    }

    #[test]
    fn test_host_and_port_defaults_logged_as_info() {
        let (_, capture) = parse_capturing(FULL_CONFIG.replace("  dbHost: db.example.com\n  dbPort: 6432\n", "").as_str());

        let info = capture.at_level(Level::INFO);
        assert_eq!(info.len(), 2);
        assert!(info[0].message.contains("'dbHost'") && info[0].message.contains(DEFAULT_DB_HOST));
        assert!(info[1].message.contains("'dbPort'"));
        assert!(info.iter().all(|e| e.field("backend") == Some(BACKEND_ID)));
        assert!(capture.critical().is_empty());
    }

    #[test]
    fn test_complete_config_logs_nothing() {
        let (_, capture) = parse_capturing(FULL_CONFIG);
        assert!(capture.events().is_empty());
    }
}
