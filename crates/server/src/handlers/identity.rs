// `identity/me/*`: what the caller is. Never scope-checked.

use plaidcloud_rpc_common::protocol::rpc_methods::{IDENTITY_ME_INFO, IDENTITY_ME_SCOPES};
use serde::Serialize;

use crate::rpc::handler::{CallContext, HandlerError};
use crate::rpc::registry::{MethodRegistry, RegistryError, RpcMethod};

#[derive(Debug, Serialize)]
struct IdentityInfo {
    workspace: Option<String>,
    user: Option<String>,
    scopes: Vec<String>,
}

pub fn register(registry: &mut MethodRegistry, version: u32) -> Result<(), RegistryError> {
    registry.register(
        version,
        IDENTITY_ME_SCOPES,
        RpcMethod::new(IDENTITY_ME_SCOPES)
            .description("Scopes held by the caller, sorted.")
            .handler(|ctx| async move { scopes(&ctx) }),
    )?;
    registry.register(
        version,
        IDENTITY_ME_INFO,
        RpcMethod::new(IDENTITY_ME_INFO)
            .description("Workspace, user and scopes of the caller.")
            .handler(|ctx| async move { info(&ctx) }),
    )
}

fn scopes(ctx: &CallContext) -> Result<serde_json::Value, HandlerError> {
    // BTreeSet iteration is already sorted.
    let scopes: Vec<&str> = ctx.auth().scopes.iter().map(String::as_str).collect();
    Ok(serde_json::json!(scopes))
}

fn info(ctx: &CallContext) -> Result<serde_json::Value, HandlerError> {
    let auth = ctx.auth();
    let info = IdentityInfo {
        workspace: auth.workspace.clone(),
        user: auth.user.clone(),
        scopes: auth.scopes.iter().cloned().collect(),
    };
    serde_json::to_value(info).map_err(|error| HandlerError::Other(error.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use plaidcloud_rpc_common::protocol::jsonrpc::DEFAULT_RPC_VERSION;
    use plaidcloud_rpc_common::types::AuthIdentity;
    use serde_json::json;

    use super::*;
    use crate::rpc::envelope::{request_envelope, Caller, EnvelopeProcessor};

    fn processor() -> EnvelopeProcessor {
        let mut registry = MethodRegistry::new();
        register(&mut registry, DEFAULT_RPC_VERSION).expect("identity methods should register");
        EnvelopeProcessor::new(Arc::new(registry))
    }

    async fn call(method: &str, auth: AuthIdentity) -> serde_json::Value {
        let envelope = request_envelope(method, Default::default(), Some(json!(1)));
        let reply = processor()
            .process_rpc(envelope, Caller::new(auth))
            .await
            .expect("no timeout")
            .and_then(|reply| reply.into_envelope())
            .expect("envelope reply");
        reply.into_result().expect("identity calls succeed")
    }

    #[tokio::test]
    async fn scopes_are_sorted_and_need_no_permission() {
        let auth = AuthIdentity::new(None, Some("u1".into()), ["z.y.read", "a.b.write", "public"]);
        let scopes = call("identity.me.scopes", auth).await;
        assert_eq!(scopes, json!(["a.b.write", "public", "z.y.read"]));
    }

    #[tokio::test]
    async fn info_reports_the_transport_identity() {
        let auth = AuthIdentity::new(Some("12".into()), Some("ann".into()), ["public"]);
        let info = call("identity/me/info", auth).await;
        assert_eq!(info, json!({ "workspace": "12", "user": "ann", "scopes": ["public"] }));

        let anonymous = call("identity/me/info", AuthIdentity::public()).await;
        assert_eq!(anonymous, json!({ "workspace": null, "user": null, "scopes": ["public"] }));
    }
}
