// `check_allow_transmit`: host-controlled switch consulted before every send.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Predicate deciding whether the client may still put traffic on the wire.
///
/// The host application flips it (typically when a user cancels a
/// long-running workflow); the client only ever reads it.
#[derive(Clone, Default)]
pub struct TransmitGate {
    check: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl TransmitGate {
    /// A gate that always allows transmission.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn from_fn<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self { check: Some(Arc::new(check)) }
    }

    /// Gate backed by a shared flag: `true` means transmission is allowed.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::from_fn(move || flag.load(Ordering::SeqCst))
    }

    pub fn allows(&self) -> bool {
        self.check.as_ref().map_or(true, |check| check())
    }
}

impl fmt::Debug for TransmitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitGate").field("configured", &self.check.is_some()).finish()
    }
}
