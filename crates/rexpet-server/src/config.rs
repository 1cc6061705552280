//! Server configuration from the environment

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// HTTP surface and process wiring settings
///
/// | Env Var         | Required | Default                 |
/// |-----------------|----------|-------------------------|
/// | `BIND_ADDR`     | no       | `0.0.0.0:3000`          |
/// | `DATABASE_URL`  | no       | in-memory store + queue |
/// | `JWT_SECRET`    | **yes**  |                         |
/// | `PUBLIC_ORIGIN` | no       | `http://localhost:5173` |
/// | `STORAGE_ROOT`  | no       | in-memory storage       |
/// | `STYLES_PATH`   | no       | built-in styles         |
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Base of the checkout success and cancel URLs
    pub public_origin: String,

    /// `sqlite://path`; unset keeps ledger and queue in memory
    pub database_url: Option<String>,

    pub storage_root: Option<PathBuf>,
    pub styles_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            jwt_secret,
            public_origin: std::env::var("PUBLIC_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            storage_root: std::env::var_os("STORAGE_ROOT").map(PathBuf::from),
            styles_path: std::env::var_os("STYLES_PATH").map(PathBuf::from),
        })
    }

    /// Defaults for tests and embedding
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            jwt_secret: jwt_secret.into(),
            public_origin: "http://localhost:5173".into(),
            database_url: None,
            storage_root: None,
            styles_path: None,
        }
    }
}
