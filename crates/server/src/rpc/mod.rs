// JSON-RPC server core plus its HTTP and Unix socket transports.

pub mod auth;
pub mod dispatch;
pub mod envelope;
pub mod handler;
pub mod http;
pub mod registry;
pub mod scope;
pub mod trace;
pub mod unix;
