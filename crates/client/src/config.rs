// Client configuration.
//
// File: `~/.plaidcloud/client.toml`, then `PLAIDCLOUD_RPC_*` env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::transport::HttpTransport;

pub const DEFAULT_URI: &str = "https://plaidcloud.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Path to the client config file: `~/.plaidcloud/client.toml`.
pub fn client_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".plaidcloud").join("client.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URI of the PlaidCloud deployment; `/json-rpc` is appended.
    pub uri: String,
    /// Bearer token. Acquiring and refreshing it is the host's job.
    pub token: Option<String>,
    pub workspace: Option<String>,
    pub verify_ssl: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.into(),
            token: None,
            workspace: None,
            verify_ssl: true,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read client config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse client config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ClientConfig {
    /// Defaults, then the config file when present, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match client_config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        Ok(base.with_env_overrides(|key| std::env::var(key)))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply `PLAIDCLOUD_RPC_*` overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `PLAIDCLOUD_RPC_URI` | `uri` |
    /// | `PLAIDCLOUD_RPC_TOKEN` | `token` |
    /// | `PLAIDCLOUD_RPC_WORKSPACE` | `workspace` |
    /// | `PLAIDCLOUD_RPC_VERIFY_SSL` | `verify_ssl` |
    /// | `PLAIDCLOUD_RPC_MAX_RETRIES` | `max_retries` |
    /// | `PLAIDCLOUD_RPC_TIMEOUT_SECS` | `timeout_secs` |
    pub fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(uri) = env("PLAIDCLOUD_RPC_URI") {
            self.uri = uri;
        }
        if let Ok(token) = env("PLAIDCLOUD_RPC_TOKEN") {
            self.token = Some(token).filter(|token| !token.is_empty());
        }
        if let Ok(workspace) = env("PLAIDCLOUD_RPC_WORKSPACE") {
            self.workspace = Some(workspace).filter(|workspace| !workspace.is_empty());
        }
        let var = |name: &str| env(name).ok();
        if let Some(verify_ssl) = var("PLAIDCLOUD_RPC_VERIFY_SSL").and_then(|v| parse_bool(&v)) {
            self.verify_ssl = verify_ssl;
        }
        if let Some(max_retries) = var("PLAIDCLOUD_RPC_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.max_retries = max_retries;
        }
        if let Some(timeout) = var("PLAIDCLOUD_RPC_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.timeout_secs = timeout;
        }
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_retries(self.max_retries)
    }

    pub fn build_transport(&self) -> Result<HttpTransport, ClientError> {
        let mut builder = HttpTransport::builder(self.uri.clone())
            .retry_policy(self.retry_policy())
            .timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .verify_ssl(self.verify_ssl);
        if let Some(token) = &self.token {
            builder = builder.token(token.clone());
        }
        if let Some(workspace) = &self.workspace {
            builder = builder.workspace(workspace.clone());
        }
        builder.build()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
