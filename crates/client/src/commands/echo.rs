// `plaidrpc echo` — round-trip a request to check connectivity and auth.

use anyhow::Context;
use clap::Args;
use plaidcloud_rpc_common::protocol::rpc_methods;
use serde_json::Value;

use super::{block_on, parse_params, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct EchoArgs {
    /// Keyword params as a JSON object.
    #[arg(long)]
    params: Option<String>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

pub fn run(args: EchoArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = parse_params(args.params.as_deref())
        .and_then(|params| block_on(echo(&args, params)).and_then(|result| result));

    match result {
        Ok(envelope) => {
            output::print_output(format, &envelope, |value| {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            })?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn echo(args: &EchoArgs, params: Value) -> anyhow::Result<Value> {
    let (_transport, proxy) = args.connection.connect()?;
    let envelope = proxy.child(rpc_methods::ECHO).call(params).await.context("echo failed")?;
    Ok(envelope.unwrap_or(Value::Null))
}
