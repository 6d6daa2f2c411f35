// Scope checks: a method's required scope against the caller's scopes.
//
// `area.resource.read` is also satisfied by `area.resource.write`; methods
// under `identity/me/` skip the check entirely.

use std::collections::BTreeSet;

use plaidcloud_rpc_common::protocol::jsonrpc::{RpcError, METHOD_NOT_FOUND};
use plaidcloud_rpc_common::protocol::rpc_methods::is_identity_me;

const READ_ACTION: &str = "read";
const WRITE_ACTION: &str = "write";

/// Scopes any one of which grants `required`.
pub fn satisfying_scopes(required: &str) -> BTreeSet<String> {
    let mut scopes = BTreeSet::from([required.to_string()]);
    if let Some(prefix) = required.strip_suffix(READ_ACTION) {
        if prefix.is_empty() || prefix.ends_with('.') {
            scopes.insert(format!("{prefix}{WRITE_ACTION}"));
        }
    }
    scopes
}

pub fn authorized(
    method_path: &str,
    required_scope: Option<&str>,
    caller_scopes: &BTreeSet<String>,
) -> bool {
    if is_identity_me(method_path) {
        return true;
    }

    match required_scope.filter(|scope| !scope.is_empty()) {
        None => true,
        Some(required) => {
            satisfying_scopes(required).iter().any(|scope| caller_scopes.contains(scope))
        }
    }
}

/// The `-32601` error for a failed check; `data` names scope strings only.
pub fn unauthorized_error(
    required_scope: Option<&str>,
    caller_scopes: &BTreeSet<String>,
) -> RpcError {
    let possible = required_scope.map(satisfying_scopes).unwrap_or_default();
    RpcError::new(METHOD_NOT_FOUND, "Method is not available due to lack of permission scope")
        .with_data(format!(
            "Possible scopes: {}, Actual scopes {}",
            render_set(&possible),
            render_set(caller_scopes)
        ))
}

fn render_set(scopes: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = scopes.iter().map(String::as_str).collect();
    format!("{{{}}}", joined.join(", "))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn scopes(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn write_satisfies_read() {
        assert!(authorized(
            "analyze/project/tables",
            Some("analyze.project.read"),
            &scopes(&["analyze.project.write"])
        ));
    }

    #[test]
    fn read_does_not_satisfy_write() {
        assert!(!authorized(
            "analyze/project/create",
            Some("analyze.project.write"),
            &scopes(&["analyze.project.read"])
        ));
    }

    #[test]
    fn identity_me_needs_no_scopes() {
        let none = BTreeSet::new();
        assert!(authorized("identity/me/scopes", Some("system.admin.write"), &none));
        assert!(authorized("identity.me.info", Some("system.admin.write"), &none));
    }

    #[test]
    fn missing_or_empty_requirement_allows_everyone() {
        let public = scopes(&["public"]);
        assert!(authorized("system/ping", None, &public));
        assert!(authorized("system/ping", Some(""), &public));
    }

    #[test]
    fn only_a_whole_read_segment_is_rewritten() {
        assert_eq!(
            satisfying_scopes("analyze.project.read"),
            scopes(&["analyze.project.read", "analyze.project.write"])
        );
        assert_eq!(
            satisfying_scopes("analyze.project.reread"),
            scopes(&["analyze.project.reread"])
        );
        assert_eq!(satisfying_scopes("analyze.project.admin"), scopes(&["analyze.project.admin"]));
    }

    #[test]
    fn unauthorized_error_names_possible_and_actual_scopes() {
        let error = unauthorized_error(Some("analyze.project.read"), &scopes(&["public"]));
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method is not available due to lack of permission scope");
        assert_eq!(
            error.data,
            "Possible scopes: {analyze.project.read, analyze.project.write}, Actual scopes {public}"
        );
    }

    proptest! {
        #[test]
        fn write_implies_read_for_any_resource(area in "[a-z]{1,8}", resource in "[a-z]{1,8}") {
            let read = format!("{area}.{resource}.read");
            let write = format!("{area}.{resource}.write");
            let method = format!("{area}/{resource}/list");

            prop_assert!(authorized(&method, Some(&read), &scopes(&[&write])));
            prop_assert!(!authorized(&method, Some(&write), &scopes(&[&read])));
        }

        #[test]
        fn identity_me_is_open_to_everyone(suffix in "[a-z]{1,12}", required in "[a-z.]{1,20}") {
            let method = format!("identity/me/{suffix}");
            prop_assert!(authorized(&method, Some(&required), &BTreeSet::new()));
        }
    }
}
