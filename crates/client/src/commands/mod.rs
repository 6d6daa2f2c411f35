// CLI subcommand dispatch.

use std::future::Future;

use anyhow::Context;
use clap::{Args, Subcommand};
use plaidcloud_rpc_client::config::ClientConfig;
use plaidcloud_rpc_client::{HttpTransport, RpcProxy};
use serde_json::Value;

pub mod call;
pub mod echo;
pub mod help;

#[derive(Subcommand)]
pub enum Command {
    /// Call a remote method, e.g. `analyze/project/tables`
    Call(call::CallArgs),
    /// Describe a remote method's parameters
    Help(help::HelpArgs),
    /// Send a request and print the envelope the server received
    Echo(echo::EchoArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Call(args) => call::run(args),
        Command::Help(args) => help::run(args),
        Command::Echo(args) => echo::run(args),
    }
}

/// Connection overrides shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Base URI of the PlaidCloud deployment.
    #[arg(long)]
    pub uri: Option<String>,

    /// Bearer token.
    #[arg(long)]
    pub token: Option<String>,

    /// Workspace id to act in.
    #[arg(long)]
    pub workspace: Option<String>,
}

impl ConnectionArgs {
    pub fn resolve(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::load().context("failed to load client config")?;
        if let Some(uri) = &self.uri {
            config.uri = uri.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(workspace) = &self.workspace {
            config.workspace = Some(workspace.clone());
        }
        Ok(config)
    }

    pub fn connect(&self) -> anyhow::Result<(HttpTransport, RpcProxy)> {
        let transport = self.resolve()?.build_transport()?;
        let proxy = RpcProxy::new(transport.clone());
        Ok((transport, proxy))
    }
}

/// Run one async command body on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(future))
}

/// Parse a `--params` argument; missing means no params.
pub fn parse_params(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        None => Ok(Value::Object(Default::default())),
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON object"),
    }
}

/// Default human rendering: strings as is, everything else pretty JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_params_become_empty_object() {
        assert_eq!(parse_params(None).unwrap(), json!({}));
    }

    #[test]
    fn params_must_be_json() {
        assert_eq!(parse_params(Some(r#"{"a": 1}"#)).unwrap(), json!({ "a": 1 }));
        assert!(parse_params(Some("a=1")).is_err());
    }

    #[test]
    fn format_value_unquotes_strings() {
        assert_eq!(format_value(&json!("done")), "done");
        assert_eq!(format_value(&Value::Null), "");
        assert!(format_value(&json!({ "a": 1 })).contains("\"a\": 1"));
    }
}
