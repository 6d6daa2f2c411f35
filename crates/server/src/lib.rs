// plaidcloud-rpc-server library entry point.

pub mod config;
pub mod direct;
pub mod handlers;
pub mod rpc;
pub mod runtime;
