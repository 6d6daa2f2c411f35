// RPC method name constants.

// ── Protocol-level ─────────────────────────────────────────────────
/// Returns the request envelope unchanged; never reaches the registry.
pub const ECHO: &str = "echo";
/// Describes another method's parameters and documentation.
pub const HELP: &str = "help";

// ── Identity ───────────────────────────────────────────────────────
/// Methods under this prefix describe the caller and skip scope checks.
pub const IDENTITY_ME_PREFIX: &str = "identity/me/";
pub const IDENTITY_ME_SCOPES: &str = "identity/me/scopes";
pub const IDENTITY_ME_INFO: &str = "identity/me/info";

// ── System ─────────────────────────────────────────────────────────
pub const SYSTEM_PING: &str = "system/ping";
pub const SYSTEM_SLEEP: &str = "system/sleep";

/// Handler-backed methods every server registers at startup.
pub const BUILTIN_METHODS: &[&str] =
    &[IDENTITY_ME_SCOPES, IDENTITY_ME_INFO, SYSTEM_PING, SYSTEM_SLEEP];

/// Methods answered by the envelope processor itself.
pub const PROTOCOL_METHODS: &[&str] = &[ECHO, HELP];

/// Whether `method_path` (dotted or slashed) addresses the caller's own identity.
pub fn is_identity_me(method_path: &str) -> bool {
    method_path.starts_with(IDENTITY_ME_PREFIX) || method_path.starts_with("identity.me.")
}
