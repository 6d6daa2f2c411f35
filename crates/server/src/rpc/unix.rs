// Line-delimited JSON-RPC over a Unix domain socket.
//
// Every connection runs as the identity the listener was started with.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use plaidcloud_rpc_common::protocol::jsonrpc::{Response, RpcError};
use plaidcloud_rpc_common::types::AuthIdentity;
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::warn;

use crate::rpc::envelope::{Caller, EnvelopeProcessor, Reply};
use crate::rpc::trace::{trace_id_for_request, with_trace_id_scope};

/// One listener's processor plus the identity every connection runs as.
#[derive(Debug, Clone)]
pub struct SocketState {
    processor: Arc<EnvelopeProcessor>,
    identity: AuthIdentity,
}

impl SocketState {
    pub fn new(processor: Arc<EnvelopeProcessor>, identity: AuthIdentity) -> Self {
        Self { processor, identity }
    }
}

/// Serve JSON-RPC 2.0 over a Unix domain socket.
///
/// Framing is newline-delimited JSON.
#[cfg(unix)]
pub async fn serve_unix(listener: UnixListener, state: SocketState) -> Result<()> {
    loop {
        let (stream, _) =
            listener.accept().await.context("failed to accept unix rpc connection")?;
        let connection_state = state.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_connection(stream, connection_state).await {
                warn!(?error, "unix rpc connection failed");
            }
        });
    }
}

/// Handle a single RPC stream. Each request line yields at most one response
/// line; executed notifications yield none.
pub async fn serve_connection<IO>(stream: IO, state: SocketState) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let mut request_line = Vec::new();
        let bytes_read = reader
            .read_until(b'\n', &mut request_line)
            .await
            .context("failed to read json-rpc request")?;

        if bytes_read == 0 {
            return Ok(());
        }

        trim_line_endings(&mut request_line);
        if request_line.iter().all(|byte| byte.is_ascii_whitespace()) {
            continue;
        }

        let trace_id = trace_id_for_request(&request_line, None);
        let caller = Caller::new(state.identity.clone());
        let processed = with_trace_id_scope(
            trace_id,
            state.processor.execute_json_rpc(&request_line, caller),
        )
        .await;

        let reply = match processed {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(timeout) => {
                warn!(%timeout, "unix rpc dispatch timed out");
                let error = RpcError::internal("Request timed out");
                Reply::Envelope(Response::failure(request_id(&request_line), error))
            }
        };

        match reply {
            Reply::Envelope(response) => {
                let encoded = serde_json::to_vec(&response)
                    .context("failed to serialize json-rpc response")?;
                write_half.write_all(&encoded).await.context("failed to write json-rpc response")?;
            }
            Reply::Chunks { mut chunks, .. } => {
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk.context("streamed result failed mid-response")?;
                    write_half.write_all(&chunk).await.context("failed to write chunk")?;
                    write_half.flush().await.context("failed to flush chunk")?;
                }
            }
        }
        write_half.write_all(b"\n").await.context("failed to write json-rpc response")?;
        write_half.flush().await.context("failed to flush json-rpc response")?;
    }
}

fn request_id(raw: &[u8]) -> Value {
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .unwrap_or(Value::Null)
}

fn trim_line_endings(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}
