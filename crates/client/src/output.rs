// How the CLI prints results and failures.
//
// Results go to stdout, diagnostics to stderr. A terminal gets plain text;
// pipes and `--json` get one JSON object per line.

use std::io::{self, IsTerminal, Write};

use plaidcloud_rpc_client::ClientError;
use serde::Serialize;
use serde_json::{json, Value};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// `--json` wins; otherwise a terminal on stdout means human output.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            Self::Json
        } else {
            Self::for_terminal(io::stdout().is_terminal())
        }
    }

    pub fn for_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Print a call result on stdout.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let line = render_result(format, value, human)?;
    writeln!(io::stdout().lock(), "{line}")
}

fn render_result<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => Ok(human(value)),
        OutputFormat::Json => serde_json::to_string(value).map_err(io::Error::other),
    }
}

/// Something that went wrong (or nearly so) with a command.
#[derive(Debug, Clone, PartialEq)]
enum Diagnostic {
    Warning(String),
    Error { code: String, message: String, data: Value },
}

impl Diagnostic {
    fn from_anyhow(error: &anyhow::Error) -> Self {
        let client_error = error.chain().find_map(|cause| cause.downcast_ref::<ClientError>());
        if let Some(ClientError::Warning(message)) = client_error {
            return Self::Warning(message.clone());
        }
        let (code, data) = match client_error {
            Some(client_error) => error_label(client_error),
            None => ("CLI_ERROR".to_string(), Value::Null),
        };
        Self::Error { code, message: format!("{error:#}"), data }
    }

    fn render(&self, format: OutputFormat, colored: bool) -> String {
        match (self, format) {
            (Self::Warning(message), OutputFormat::Human) => {
                labelled("warning", message, colored.then_some(YELLOW))
            }
            (Self::Error { message, data, .. }, OutputFormat::Human) => {
                let line = labelled("error", message, colored.then_some(RED));
                match data {
                    Value::Null => line,
                    Value::String(text) => format!("{line} ({text})"),
                    other => format!("{line} ({other})"),
                }
            }
            (Self::Warning(message), OutputFormat::Json) => {
                json!({ "warning": { "message": message } }).to_string()
            }
            (Self::Error { code, message, data }, OutputFormat::Json) => {
                json!({ "error": { "code": code, "message": message, "data": data } }).to_string()
            }
        }
    }
}

/// Print a failed command on stderr; server warnings print as warnings.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let line = Diagnostic::from_anyhow(error).render(format, io::stderr().is_terminal());
    let _ = writeln!(io::stderr().lock(), "{line}");
}

/// Stable label for a client error: the RPC code when the server sent one.
fn error_label(error: &ClientError) -> (String, Value) {
    if let Some(rpc) = error.rpc_error() {
        return (rpc.code.to_string(), rpc.data.clone());
    }
    let label = match error {
        ClientError::Connection(_) => "CONNECTION_FAILED",
        ClientError::Http { .. } => "HTTP_ERROR",
        ClientError::TransmitDisallowed { .. } => "TRANSMIT_DISALLOWED",
        ClientError::InvalidParams(_) => "INVALID_PARAMS",
        ClientError::InvalidMethodPath { .. } => "INVALID_METHOD_PATH",
        ClientError::Config(_) => "CONFIG_ERROR",
        _ => "RPC_ERROR",
    };
    (label.to_string(), Value::Null)
}

fn labelled(label: &str, message: &str, color: Option<&str>) -> String {
    match color {
        Some(color) => format!("{color}{label}:{RESET} {message}"),
        None => format!("{label}: {message}"),
    }
}
