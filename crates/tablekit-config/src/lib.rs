//! Connection configuration for tablekit
//!
//! Settings come from an optional TOML file (`[database]` table) and are then
//! overridden by `TABLEKIT_DB_*` environment variables. Nothing connects until
//! [`AppConfig::db_config`] has produced a validated [`DbConfig`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Environment variable naming the TOML file to read
pub const CONFIG_PATH_ENV: &str = "TABLEKIT_CONFIG";

/// File used when `TABLEKIT_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "tablekit.toml";

/// Environment overrides, one per `[database]` key
pub mod env_keys {
    pub const DRIVER: &str = "TABLEKIT_DB_DRIVER";
    pub const HOST: &str = "TABLEKIT_DB_HOST";
    pub const PORT: &str = "TABLEKIT_DB_PORT";
    pub const NAME: &str = "TABLEKIT_DB_NAME";
    pub const USER: &str = "TABLEKIT_DB_USER";
    pub const PASSWORD: &str = "TABLEKIT_DB_PASSWORD";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("database config invalid: missing `{0}`")]
    Missing(&'static str),
    #[error("unknown database driver: {0}")]
    UnknownDriver(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid database host `{host}`: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cannot encode `{0}` into the connection url")]
    InvalidUrlPart(&'static str),
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database engine behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    MySql,
    Postgres,
    Sqlite,
}

impl Driver {
    /// URL scheme understood by sqlx
    pub fn scheme(self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Sqlite => "sqlite",
        }
    }
}

impl FromStr for Driver {
    type Err = ConfigError;

    /// Accepts plain engine names as well as the PDO-style identifiers
    /// (`pdo_mysql`, `pdo_pgsql`, ...) found in older deployments.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mysqli" | "pdo_mysql" | "mariadb" => Ok(Driver::MySql),
            "postgres" | "postgresql" | "pgsql" | "pdo_pgsql" => Ok(Driver::Postgres),
            "sqlite" | "sqlite3" | "pdo_sqlite" => Ok(Driver::Sqlite),
            _ => Err(ConfigError::UnknownDriver(name.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Raw `[database]` table. Every key stays optional until validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: Option<DatabaseSection>,
}

impl AppConfig {
    /// Load configuration from TABLEKIT_CONFIG path (TOML) if present, otherwise empty
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(path)
    }

    /// Read a TOML file; a missing file yields the empty configuration
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let cfg = if path.exists() {
            let s = fs::read_to_string(path)?;
            toml::from_str::<AppConfig>(&s)?
        } else {
            AppConfig::default()
        };
        Ok(cfg)
    }

    /// Apply `TABLEKIT_DB_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = self.database.get_or_insert_with(DatabaseSection::default);

        if let Some(v) = lookup(env_keys::DRIVER) {
            db.driver = Some(v);
        }
        if let Some(v) = lookup(env_keys::HOST) {
            db.host = Some(v);
        }
        if let Some(v) = lookup(env_keys::PORT) {
            let port = v
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(v.clone()))?;
            db.port = Some(port);
        }
        if let Some(v) = lookup(env_keys::NAME) {
            db.dbname = Some(v);
        }
        if let Some(v) = lookup(env_keys::USER) {
            db.user = Some(v);
        }
        if let Some(v) = lookup(env_keys::PASSWORD) {
            db.password = Some(v);
        }

        Ok(self)
    }

    /// Validate the `[database]` table into a connectable configuration.
    ///
    /// Driver, host, database name, user and password must all be present.
    /// Empty strings are accepted (SQLite has no use for host or credentials).
    pub fn db_config(&self) -> Result<DbConfig, ConfigError> {
        let db = self
            .database
            .as_ref()
            .ok_or(ConfigError::Missing("driver"))?;

        let driver = db
            .driver
            .as_deref()
            .ok_or(ConfigError::Missing("driver"))?
            .parse::<Driver>()?;
        let host = db.host.clone().ok_or(ConfigError::Missing("host"))?;
        let dbname = db.dbname.clone().ok_or(ConfigError::Missing("dbname"))?;
        let user = db.user.clone().ok_or(ConfigError::Missing("user"))?;
        let password = db.password.clone().ok_or(ConfigError::Missing("password"))?;

        Ok(DbConfig {
            driver,
            host,
            port: db.port,
            dbname,
            user,
            password,
        })
    }
}

/// Validated connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub driver: Driver,
    pub host: String,
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    /// Load the file named by TABLEKIT_CONFIG, apply env overrides, validate
    pub fn from_env() -> Result<Self, ConfigError> {
        AppConfig::load()?.with_env_overrides()?.db_config()
    }

    /// SQLite database at `path` (`:memory:` for a private in-memory database)
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            host: String::new(),
            port: None,
            dbname: path.into(),
            user: String::new(),
            password: String::new(),
        }
    }

    /// Build the sqlx connection url, percent-encoding credentials
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if self.driver == Driver::Sqlite {
            return Ok(format!("sqlite:{}", self.dbname));
        }

        let mut url = Url::parse(&format!("{}://{}", self.driver.scheme(), self.host)).map_err(
            |source| ConfigError::InvalidHost {
                host: self.host.clone(),
                source,
            },
        )?;

        url.set_username(&self.user)
            .map_err(|_| ConfigError::InvalidUrlPart("user"))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| ConfigError::InvalidUrlPart("password"))?;
        }
        if self.port.is_some() {
            url.set_port(self.port)
                .map_err(|_| ConfigError::InvalidUrlPart("port"))?;
        }
        url.set_path(&self.dbname);

        Ok(url.to_string())
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
