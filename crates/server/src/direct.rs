// In-process transport: the client proxy talking straight to an envelope
// processor, with no network in between.
//
//   let rpc = RpcProxy::new(DirectTransport::new(processor, identity));
//   let scopes = rpc.path("identity/me/scopes").call(json!({})).await?;

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::TryStreamExt;
use plaidcloud_rpc_client::{ClientError, OutgoingCall, TransmitGate, Transport};
use plaidcloud_rpc_common::protocol::jsonrpc::RpcError;
use plaidcloud_rpc_common::types::AuthIdentity;
use serde_json::Value;

use crate::rpc::envelope::{request_envelope, Caller, EnvelopeProcessor, Reply};

const DIRECT_REQUEST_ID: i64 = 0;

/// Calls run as `identity`; `fire_and_forget` is ignored since the call
/// completes in place anyway.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    processor: Arc<EnvelopeProcessor>,
    identity: AuthIdentity,
}

impl DirectTransport {
    pub fn new(processor: Arc<EnvelopeProcessor>, identity: AuthIdentity) -> Self {
        Self { processor, identity }
    }

    async fn call(&self, call: OutgoingCall) -> Result<Option<Value>, ClientError> {
        let envelope =
            request_envelope(&call.method_path, call.params, Some(Value::from(DIRECT_REQUEST_ID)));
        let processed = self.processor.process_rpc(envelope, Caller::new(self.identity.clone()));

        match processed.await {
            Ok(Some(Reply::Envelope(response))) => {
                response.into_result().map(Some).map_err(ClientError::from)
            }
            Ok(Some(Reply::Chunks { chunks, .. })) => {
                let parts: Vec<Vec<u8>> = chunks
                    .map_err(|error| ClientError::Decode(error.to_string()))
                    .try_collect()
                    .await?;
                let body = parts.concat();
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|error| ClientError::Decode(error.to_string()))
            }
            Ok(None) => Ok(None),
            Err(timeout) => Err(ClientError::Rpc(RpcError::internal(timeout.to_string()))),
        }
    }
}

impl Transport for DirectTransport {
    fn call_rpc<'a>(
        &'a self,
        call: OutgoingCall,
        _gate: &'a TransmitGate,
    ) -> BoxFuture<'a, Result<Option<Value>, ClientError>> {
        self.call(call).boxed()
    }
}
