// `plaidrpc call` — invoke a method by path with JSON keyword params.

use anyhow::Context;
use clap::Args;
use plaidcloud_rpc_client::CallOptions;
use serde_json::Value;

use super::{block_on, format_value, parse_params, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Method path, dotted or slashed (`system.ping` or `system/ping`).
    pub method: String,

    /// Keyword params as a JSON object.
    #[arg(long)]
    params: Option<String>,

    /// Send without waiting for the result.
    #[arg(long)]
    fire_and_forget: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

pub fn run(args: CallArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = parse_params(args.params.as_deref())
        .and_then(|params| block_on(call(&args, params)).and_then(|result| result));

    match result {
        Ok(Some(value)) => {
            output::print_output(format, &value, format_value)?;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn call(args: &CallArgs, params: Value) -> anyhow::Result<Option<Value>> {
    let (transport, proxy) = args.connection.connect()?;
    let options = CallOptions { fire_and_forget: args.fire_and_forget };
    let result = proxy
        .path(&args.method)
        .call_with(params, options)
        .await
        .with_context(|| format!("call to `{}` failed", args.method))?;
    transport.drain().await;
    Ok(result)
}
