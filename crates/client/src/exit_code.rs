// Consistent exit codes for the plaidrpc CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   11 = authentication or permission error
//   13 = network error
//   14 = the server answered with a warning

use std::process;

use plaidcloud_rpc_client::ClientError;
use plaidcloud_rpc_common::protocol::jsonrpc::{INVALID_PARAMS, INVALID_REQUEST};

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
    Warning = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(client_err) = cause.downcast_ref::<ClientError>() {
                return Self::from_client_error(client_err);
            }
            if cause.downcast_ref::<serde_json::Error>().is_some() {
                return Self::Usage;
            }
        }
        Self::Error
    }

    pub fn from_client_error(err: &ClientError) -> Self {
        match err {
            ClientError::Warning(_) => Self::Warning,
            ClientError::Connection(_) => Self::Network,
            ClientError::Http { status: 401 | 403, .. } => Self::Auth,
            ClientError::Http { status, .. } if *status >= 500 => Self::Network,
            ClientError::InvalidParams(_)
            | ClientError::InvalidMethodPath { .. }
            | ClientError::Config(_) => Self::Usage,
            ClientError::Rpc(rpc) => Self::from_rpc_code(rpc.code, &rpc.message),
            _ => Self::Error,
        }
    }

    /// Map a JSON-RPC error code to an exit code.
    pub fn from_rpc_code(code: i64, message: &str) -> Self {
        match code {
            INVALID_PARAMS | INVALID_REQUEST => Self::Usage,
            _ if message.contains("permission scope") => Self::Auth,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
