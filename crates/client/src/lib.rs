pub mod config;
pub mod error;
pub mod gate;
pub mod proxy;
pub mod retry;
pub mod transport;

pub use error::ClientError;
pub use gate::TransmitGate;
pub use proxy::{CallOptions, MethodPath, RpcProxy};
pub use transport::{HttpTransport, OutgoingCall, Transport};
