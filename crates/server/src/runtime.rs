// Wiring: config → registry → processor → transports.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use plaidcloud_rpc_common::types::AuthIdentity;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::handlers::register_builtin;
use crate::rpc::auth::{AuthChain, JwtAuthenticator};
use crate::rpc::dispatch::Dispatcher;
use crate::rpc::envelope::EnvelopeProcessor;
use crate::rpc::http::{self, HttpState};
use crate::rpc::registry::MethodRegistry;

const SOCKET_USER: &str = "local";

/// A processor serving the built-in methods for the configured version.
pub fn build_processor(config: &ServerConfig) -> Result<Arc<EnvelopeProcessor>> {
    let mut registry = MethodRegistry::new();
    register_builtin(&mut registry, config.rpc_version)
        .context("failed to register built-in handlers")?;
    info!(methods = registry.len(), "method registry ready");

    let dispatcher = Dispatcher::new().with_timeout(config.dispatch_timeout());
    Ok(Arc::new(
        EnvelopeProcessor::new(Arc::new(registry))
            .with_dispatcher(dispatcher)
            .with_version(config.rpc_version),
    ))
}

pub fn build_http_state(
    config: &ServerConfig,
    processor: Arc<EnvelopeProcessor>,
) -> Result<HttpState> {
    if config.is_dev_jwt_secret() {
        if !config.dev_mode {
            anyhow::bail!(
                "refusing to serve with the development JWT secret; \
                 set PLAIDCLOUD_RPC_JWT_SECRET or enable dev_mode"
            );
        }
        warn!("dev mode: using the development JWT secret");
    }
    let jwt = JwtAuthenticator::new(&config.jwt_secret).context("invalid JWT secret")?;
    Ok(HttpState::new(processor, AuthChain::new().with(jwt)).allow_public(config.allow_public))
}

/// The identity socket connections run as.
pub fn socket_identity(config: &ServerConfig) -> AuthIdentity {
    AuthIdentity::new(None, Some(SOCKET_USER.to_string()), config.socket_scopes.iter().cloned())
}

/// Serve until ctrl-c or SIGTERM.
pub async fn run(config: ServerConfig) -> Result<()> {
    let processor = build_processor(&config)?;
    let state = build_http_state(&config, Arc::clone(&processor))?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {}", config.listen_addr))?;
    info!(listen_addr = %config.listen_addr, version = config.rpc_version, "serving json-rpc");
    let router = http::router(state, config.max_body_bytes);
    let http_server = http::serve(listener, router, shutdown_signal());

    match &config.socket_path {
        Some(socket_path) => {
            let socket_server = serve_socket(socket_path, processor, socket_identity(&config));
            let result = tokio::select! {
                result = http_server => result,
                result = socket_server => result,
            };
            let _ = std::fs::remove_file(socket_path);
            result
        }
        None => http_server.await,
    }
}

#[cfg(unix)]
async fn serve_socket(
    socket_path: &Path,
    processor: Arc<EnvelopeProcessor>,
    identity: AuthIdentity,
) -> Result<()> {
    use crate::rpc::unix::{serve_unix, SocketState};

    if socket_path.exists() {
        std::fs::remove_file(socket_path).with_context(|| {
            format!("failed to remove stale socket at {}", socket_path.display())
        })?;
    }
    let listener = tokio::net::UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind unix socket at {}", socket_path.display()))?;
    info!(socket_path = %socket_path.display(), "serving json-rpc on unix socket");
    serve_unix(listener, SocketState::new(processor, identity)).await
}

#[cfg(not(unix))]
async fn serve_socket(
    socket_path: &Path,
    _processor: Arc<EnvelopeProcessor>,
    _identity: AuthIdentity,
) -> Result<()> {
    anyhow::bail!("unix sockets are not supported here: {}", socket_path.display())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use plaidcloud_rpc_common::types::PUBLIC_SCOPE;

    use super::*;

    #[test]
    fn processor_serves_builtins_at_configured_version() {
        let config = ServerConfig { rpc_version: 2, ..ServerConfig::default() };
        let processor = build_processor(&config).expect("processor");
        assert_eq!(processor.version(), 2);
        assert!(processor.registry().resolve("system/ping", 2).is_ok());
        assert!(processor.registry().resolve("system/ping", 1).is_err());
    }

    #[test]
    fn socket_identity_defaults_to_public() {
        let identity = socket_identity(&ServerConfig::default());
        assert_eq!(identity.user.as_deref(), Some(SOCKET_USER));
        assert!(identity.has_scope(PUBLIC_SCOPE));

        let config =
            ServerConfig { socket_scopes: vec!["system".into()], ..ServerConfig::default() };
        assert!(socket_identity(&config).is_system_user());
    }

    #[test]
    fn development_secret_needs_dev_mode() {
        let config = ServerConfig::default();
        let processor = build_processor(&config).expect("processor");
        let error = build_http_state(&config, Arc::clone(&processor)).err().expect("development secret must be rejected");
        assert!(error.to_string().contains("development JWT secret"), "{error:#}");

        let config = ServerConfig { dev_mode: true, ..ServerConfig::default() };
        assert!(build_http_state(&config, processor).is_ok());
    }

    #[test]
    fn short_jwt_secret_is_a_startup_error() {
        let config = ServerConfig { jwt_secret: "short".into(), ..ServerConfig::default() };
        let processor = build_processor(&config).expect("processor");
        assert!(build_http_state(&config, processor).is_err());
    }
}
