// Server configuration.
//
// File: `~/.plaidcloud/server.toml` (or an explicit path), then
// `PLAIDCLOUD_RPC_*` env overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plaidcloud_rpc_common::protocol::jsonrpc::DEFAULT_RPC_VERSION;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEV_JWT_SECRET: &str = "plaidcloud_local_development_jwt_secret_32_chars";

/// Path to the server config file: `~/.plaidcloud/server.toml`.
pub fn server_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".plaidcloud").join("server.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Line-delimited JSON-RPC socket; disabled when unset.
    pub socket_path: Option<PathBuf>,
    /// Scopes every socket connection runs with; `public` when empty.
    pub socket_scopes: Vec<String>,
    /// Handler namespace version served.
    pub rpc_version: u32,
    /// Log filter directive (e.g. `info`, `plaidcloud_rpc_server=debug`).
    pub log_filter: String,
    /// Calls running longer than this are cut off; unlimited when unset.
    pub dispatch_timeout_secs: Option<u64>,
    pub max_body_bytes: usize,
    /// HS256 signing secret for bearer tokens.
    pub jwt_secret: String,
    /// Serve unauthenticated callers with the `public` scope instead of 401.
    pub allow_public: bool,
    /// Local development: permits the built-in JWT secret.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            socket_path: None,
            socket_scopes: Vec::new(),
            rpc_version: DEFAULT_RPC_VERSION,
            log_filter: "info".into(),
            dispatch_timeout_secs: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            jwt_secret: DEV_JWT_SECRET.into(),
            allow_public: false,
            dev_mode: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read server config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse server config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ServerConfig {
    /// Defaults, then `path` (or the default file when present), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::load_from(path)?,
            None => match server_config_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        Ok(base.with_env_overrides(|key| std::env::var(key)))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply environment overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `PLAIDCLOUD_RPC_HOST` / `PLAIDCLOUD_RPC_PORT` | `listen_addr` |
    /// | `PLAIDCLOUD_RPC_SOCKET` | `socket_path` |
    /// | `PLAIDCLOUD_RPC_JWT_SECRET` | `jwt_secret` |
    /// | `PLAIDCLOUD_RPC_LOG_FILTER` | `log_filter` |
    /// | `PLAIDCLOUD_RPC_DISPATCH_TIMEOUT_SECS` | `dispatch_timeout_secs` |
    /// | `PLAIDCLOUD_RPC_ALLOW_PUBLIC` | `allow_public` |
    /// | `PLAIDCLOUD_RPC_MAX_BODY_BYTES` | `max_body_bytes` |
    /// | `PLAIDCLOUD_RPC_DEV_MODE` | `dev_mode` |
    pub fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PLAIDCLOUD_RPC_HOST").ok();
        let port = env("PLAIDCLOUD_RPC_PORT").ok().and_then(|v| v.parse::<u16>().ok());
        if host.is_some() || port.is_some() {
            let host = host.unwrap_or_else(|| self.listen_addr.ip().to_string());
            let port = port.unwrap_or_else(|| self.listen_addr.port());
            if let Ok(addr) = format!("{host}:{port}").parse() {
                self.listen_addr = addr;
            }
        }

        if let Ok(socket) = env("PLAIDCLOUD_RPC_SOCKET") {
            self.socket_path = Some(PathBuf::from(socket)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(secret) = env("PLAIDCLOUD_RPC_JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Ok(filter) = env("PLAIDCLOUD_RPC_LOG_FILTER") {
            self.log_filter = filter;
        }
        if let Some(timeout) =
            env("PLAIDCLOUD_RPC_DISPATCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok())
        {
            self.dispatch_timeout_secs = Some(timeout).filter(|secs| *secs > 0);
        }
        if let Some(allow) = env("PLAIDCLOUD_RPC_ALLOW_PUBLIC").ok().and_then(|v| parse_bool(&v)) {
            self.allow_public = allow;
        }
        if let Some(bytes) = env("PLAIDCLOUD_RPC_MAX_BODY_BYTES").ok().and_then(|v| v.parse().ok())
        {
            self.max_body_bytes = bytes;
        }
        if let Some(dev_mode) = env("PLAIDCLOUD_RPC_DEV_MODE").ok().and_then(|v| parse_bool(&v)) {
            self.dev_mode = dev_mode;
        }
        self
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_secs.map(Duration::from_secs)
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
