// `system/*`: liveness and a worker-offload probe.

use std::time::Duration;

use plaidcloud_rpc_common::protocol::jsonrpc::INVALID_PARAMS;
use plaidcloud_rpc_common::protocol::rpc_methods::{SYSTEM_PING, SYSTEM_SLEEP};
use serde_json::{json, Value};

use crate::rpc::handler::{CallContext, HandlerError};
use crate::rpc::registry::{MethodRegistry, RegistryError, RpcMethod};

pub const SLEEP_SCOPE: &str = "system.admin.write";
const MAX_SLEEP_SECS: f64 = 300.0;

pub fn register(registry: &mut MethodRegistry, version: u32) -> Result<(), RegistryError> {
    registry.register(
        version,
        SYSTEM_PING,
        RpcMethod::new(SYSTEM_PING)
            .description("Liveness check.")
            .handler(|_ctx| async { Ok(json!({ "ok": true })) }),
    )?;
    registry.register(
        version,
        SYSTEM_SLEEP,
        RpcMethod::new(SYSTEM_SLEEP)
            .required_scope(SLEEP_SCOPE)
            .default_error("Exception while sleeping")
            .use_thread()
            .param("seconds")
            .description("Block a worker thread for `seconds` (at most 300).")
            .blocking(sleep),
    )
}

fn sleep(ctx: CallContext) -> Result<Value, HandlerError> {
    let seconds: f64 = ctx.param("seconds")?;
    if !(0.0..=MAX_SLEEP_SECS).contains(&seconds) {
        return Err(HandlerError::rpc(
            INVALID_PARAMS,
            format!("`seconds` must be between 0 and {MAX_SLEEP_SECS}"),
        ));
    }
    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(json!({ "slept": seconds }))
}
