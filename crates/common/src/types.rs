// Identity types shared across the RPC server and client.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Scope granted to every caller, authenticated or not.
pub const PUBLIC_SCOPE: &str = "public";

/// Scope marking an internal/system caller.
pub const SYSTEM_SCOPE: &str = "system";

/// Parameter name under which the caller identity is injected.
pub const AUTH_ID_PARAM: &str = "auth_id";

/// Who is calling: supplied by the transport, never by request params.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthIdentity {
    pub workspace: Option<String>,
    pub user: Option<String>,
    pub scopes: BTreeSet<String>,
}

impl Default for AuthIdentity {
    fn default() -> Self {
        Self::public()
    }
}

impl AuthIdentity {
    /// Unauthenticated caller holding only the `public` scope.
    pub fn public() -> Self {
        Self { workspace: None, user: None, scopes: BTreeSet::from([PUBLIC_SCOPE.to_string()]) }
    }

    /// Build an identity; an empty scope set falls back to `{"public"}`.
    pub fn new<I, S>(workspace: Option<String>, user: Option<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scopes: BTreeSet<String> = scopes.into_iter().map(Into::into).collect();
        if scopes.is_empty() {
            scopes.insert(PUBLIC_SCOPE.to_string());
        }
        Self { workspace, user, scopes }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn is_system_user(&self) -> bool {
        self.has_scope(SYSTEM_SCOPE)
    }

    /// The (workspace, user) pair a handler isolates its data by.
    pub fn isolation(&self) -> (Option<&str>, Option<&str>) {
        (self.workspace.as_deref(), self.user.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_set_defaults_to_public() {
        let identity =
            AuthIdentity::new(Some("12".into()), Some("ann".into()), Vec::<String>::new());
        assert!(identity.has_scope(PUBLIC_SCOPE));
        assert_eq!(identity.scopes.len(), 1);
    }

    #[test]
    fn explicit_scopes_are_kept_as_given() {
        let identity = AuthIdentity::new(None, None, ["analyze.project.read"]);
        assert!(identity.has_scope("analyze.project.read"));
        assert!(!identity.has_scope(PUBLIC_SCOPE));
    }

    #[test]
    fn system_user_is_detected_by_scope() {
        assert!(AuthIdentity::new(None, None, [SYSTEM_SCOPE]).is_system_user());
        assert!(!AuthIdentity::public().is_system_user());
    }

    #[test]
    fn isolation_exposes_workspace_and_user() {
        let identity = AuthIdentity::new(Some("ws-1".into()), Some("user-9".into()), ["public"]);
        assert_eq!(identity.isolation(), (Some("ws-1"), Some("user-9")));
    }
}
