// plaidcloud-rpc-common: envelope types and helpers shared by the RPC server and client

pub mod path;
pub mod protocol;
pub mod types;
