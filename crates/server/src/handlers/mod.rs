// Built-in handlers every server registers at startup.

pub mod identity;
pub mod system;

use crate::rpc::registry::{MethodRegistry, RegistryError};

/// Register the built-in methods under `version`.
pub fn register_builtin(registry: &mut MethodRegistry, version: u32) -> Result<(), RegistryError> {
    identity::register(registry, version)?;
    system::register(registry, version)?;
    Ok(())
}
