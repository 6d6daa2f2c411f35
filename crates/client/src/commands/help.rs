// `plaidrpc help` — ask the server to describe a method.

use anyhow::Context;
use clap::Args;
use plaidcloud_rpc_common::protocol::rpc_methods;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{block_on, ConnectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct HelpArgs {
    /// Method path to describe.
    pub method: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodHelp {
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
}

pub fn run(args: HelpArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match block_on(describe(&args)).and_then(|result| result) {
        Ok(help) => {
            output::print_output(format, &help, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn describe(args: &HelpArgs) -> anyhow::Result<MethodHelp> {
    let (_transport, proxy) = args.connection.connect()?;
    proxy
        .child(rpc_methods::HELP)
        .call_as(json!({ "method": args.method }))
        .await
        .with_context(|| format!("help for `{}` failed", args.method))?
        .context("server returned no description")
}

fn format_human(help: &MethodHelp) -> String {
    let mut lines = vec![help.method.clone()];
    if !help.description.trim().is_empty() {
        lines.push(String::new());
        lines.push(help.description.trim().to_string());
    }
    lines.push(String::new());
    if help.params.is_empty() {
        lines.push("No parameters.".to_string());
    } else {
        lines.push("Parameters:".to_string());
        for (name, default) in &help.params {
            match default {
                Value::Null => lines.push(format!("  {name} (required)")),
                other => lines.push(format!("  {name} = {other}")),
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MethodHelp {
        serde_json::from_value(json!({
            "method": "analyze/project/tables",
            "params": { "project_id": null, "limit": 100 },
            "description": "List tables in a project."
        }))
        .unwrap()
    }

    #[test]
    fn human_format_marks_required_params() {
        let text = format_human(&sample());
        assert!(text.starts_with("analyze/project/tables"));
        assert!(text.contains("project_id (required)"));
        assert!(text.contains("limit = 100"));
        assert!(text.contains("List tables in a project."));
    }

    #[test]
    fn human_format_without_params() {
        let help = MethodHelp {
            method: "system/ping".into(),
            params: Map::new(),
            description: String::new(),
        };
        assert!(format_human(&help).contains("No parameters."));
    }
}
