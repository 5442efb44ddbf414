use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{QuillError, Result};

/// Database configuration.
///
/// Either `url` is set directly, or it is assembled from the discrete
/// `host`/`port`/`name`/`user`/`password` fields for the chosen driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the discrete fields.
    #[serde(default)]
    pub url: Option<String>,

    /// Database driver. Inferred from the URL scheme when absent.
    #[serde(default)]
    pub driver: Option<Dialect>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Maximum open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connections kept open while idle.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Maximum lifetime of a pooled connection in seconds.
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Idle time before a pooled connection is closed, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            driver: None,
            host: None,
            port: None,
            name: None,
            user: None,
            password: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    25
}

fn default_min_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_max_lifetime() -> u64 {
    5 * 60
}

fn default_idle_timeout() -> u64 {
    2 * 60
}

impl DatabaseConfig {
    /// Configuration for a known URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Overlay values found through `lookup` (normally the process environment).
    ///
    /// Recognised keys: `DATABASE_URL`, `DB_DRIVER` (or `DB_TYPE`), `DB_HOST`,
    /// `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.url = Some(url);
        }
        if let Some(driver) = lookup("DB_DRIVER").or_else(|| lookup("DB_TYPE")) {
            self.driver = Some(driver.parse()?);
        }
        if let Some(host) = lookup("DB_HOST") {
            self.host = Some(host);
        }
        if let Some(port) = lookup("DB_PORT") {
            let port = port
                .parse()
                .map_err(|_| QuillError::Config(format!("Invalid DB_PORT: {}", port)))?;
            self.port = Some(port);
        }
        if let Some(name) = lookup("DB_NAME") {
            self.name = Some(name);
        }
        if let Some(user) = lookup("DB_USER") {
            self.user = Some(user);
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            self.password = Some(password);
        }
        Ok(())
    }

    /// Resolve the dialect: explicit driver, else URL scheme, else PostgreSQL.
    pub fn dialect(&self) -> Result<Dialect> {
        let from_url = match self.url.as_deref() {
            Some(url) => Some(Dialect::from_url(url).ok_or_else(|| {
                QuillError::Config(format!("Unrecognised database URL scheme: {}", redact(url)))
            })?),
            None => None,
        };

        match (self.driver, from_url) {
            (Some(driver), Some(scheme)) if driver != scheme => Err(QuillError::Config(format!(
                "Database driver '{}' does not match URL scheme '{}'",
                driver, scheme
            ))),
            (Some(driver), _) => Ok(driver),
            (None, Some(scheme)) => Ok(scheme),
            (None, None) => Ok(Dialect::default()),
        }
    }

    /// Normalized connection URL for the resolved dialect.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let dialect = self.dialect()?;
        let (Some(host), Some(name), Some(user)) = (&self.host, &self.name, &self.user) else {
            return Err(QuillError::Config(
                "Database configuration is incomplete. Set DATABASE_URL or DB_HOST, DB_NAME, DB_USER"
                    .to_string(),
            ));
        };
        let password = self.password.as_deref().unwrap_or_default();
        let port = self.port.unwrap_or_else(|| dialect.default_port());

        Ok(match dialect {
            Dialect::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode=disable",
                user, password, host, port, name
            ),
            Dialect::MySql => format!("mysql://{}:{}@{}:{}/{}", user, password, host, port, name),
        })
    }
}

/// Hide credentials in a connection URL for log and error output.
pub fn redact(url: &str) -> String {
    match (url.split_once("://"), url.rfind('@')) {
        (Some((scheme, _)), Some(at)) => format!("{}://***{}", scheme, &url[at..]),
        _ => url.to_string(),
    }
}
