//! Database connection management
//!
//! This module provides:
//! - The explicit [`ConnectionParams`] record a job connects with
//! - Parsing of secret-shaped JSON documents into that record
//! - Pool construction for export jobs (one connection per job)

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{debug, info};

use crate::error::{ConfigError, ExportError, Result};

/// Connection record for the relational store
///
/// Accepts `username` for `user` and `dbname` for `database`, and a port
/// given either as a number or as a string, as found in stored secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(alias = "dbname")]
    pub database: String,
    #[serde(alias = "username")]
    pub user: String,
    pub password: String,
    /// libpq ssl mode: disable, allow, prefer, require, verify-ca, verify-full
    pub sslmode: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            sslmode: "prefer".to_string(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{text}'"))),
    }
}

impl ConnectionParams {
    /// Parse a secret-shaped JSON document
    ///
    /// # Arguments
    /// * `json` - Document with host, port, dbname/database, username/user, password
    ///
    /// # Returns
    /// * `Result<Self>` - Parsed record or config error
    pub fn from_secret_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExportError::Config(ConfigError::InvalidFormat(e.to_string())))
    }

    /// Load a secret-shaped JSON document from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ExportError::Config(ConfigError::FileNotFound(path.display().to_string()))
            }
            _ => ExportError::Io(e),
        })?;
        Self::from_secret_json(&text)
    }

    /// `host:port/database`, as used in logs and errors
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    /// Driver options for this record
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if self.host.trim().is_empty() {
            return Err(ExportError::Config(ConfigError::MissingField(
                "database.host".to_string(),
            )));
        }
        let ssl_mode = PgSslMode::from_str(&self.sslmode).map_err(|_| {
            ExportError::Config(ConfigError::InvalidValue {
                field: "database.sslmode".to_string(),
                value: self.sslmode.clone(),
            })
        })?;

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .ssl_mode(ssl_mode)
            .application_name("rds-export");
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        Ok(options)
    }
}

/// Open the pool a job runs on
///
/// # Arguments
/// * `params` - Connection record
/// * `timeout` - Time allowed to acquire the connection
///
/// # Returns
/// * `Result<PgPool>` - Pool holding a single connection
pub async fn connect(params: &ConnectionParams, timeout: Duration) -> Result<PgPool> {
    let options = params.connect_options()?;
    debug!("Connecting with {:?}", params);

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(timeout)
        .connect_with(options)
        .await
        .map_err(|e| ExportError::connection(params.endpoint(), e))?;

    info!("Connected to {}", params.endpoint());
    Ok(pool)
}
