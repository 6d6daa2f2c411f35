// Method path canonicalization: dotted or slashed input, `/`-joined output, 512 char max.

use thiserror::Error;

/// Maximum allowed method path length in characters.
const MAX_METHOD_PATH_CHARS: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MethodPathError {
    #[error("no method path specified")]
    Empty,

    #[error("method path exceeds maximum length of {MAX_METHOD_PATH_CHARS} characters")]
    TooLong,

    #[error("method path contains null byte")]
    NullByte,

    #[error("method path contains invalid segment: {0}")]
    InvalidSegment(String),
}

/// Normalize a method path into its canonical `/`-separated form.
///
/// Rules:
/// - A path containing `/` is split on `/`; otherwise it is split on `.`
///   (`identity.me.scopes` and `identity/me/scopes` are the same method)
/// - Empty segments from leading, trailing or doubled separators are dropped
/// - Whitespace-only segments are rejected
/// - Null bytes are rejected
/// - Enforce max 512 character limit (after normalization)
pub fn normalize_method_path(input: &str) -> Result<String, MethodPathError> {
    if input.trim().is_empty() {
        return Err(MethodPathError::Empty);
    }

    if input.contains('\0') {
        return Err(MethodPathError::NullByte);
    }

    let separator = if input.contains('/') { '/' } else { '.' };
    let segments: Vec<&str> = input.split(separator).filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return Err(MethodPathError::Empty);
    }

    for segment in &segments {
        if segment.trim().is_empty() {
            return Err(MethodPathError::InvalidSegment(
                "(whitespace-only segment)".to_string(),
            ));
        }
    }

    let result = segments.join("/");

    if result.chars().count() > MAX_METHOD_PATH_CHARS {
        return Err(MethodPathError::TooLong);
    }

    Ok(result)
}

/// Join already-split path segments into a method path string.
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slashed_path_is_kept() {
        let path = normalize_method_path("analyze/project/tables").unwrap();
        assert_eq!(path, "analyze/project/tables");
    }

    #[test]
    fn test_dotted_path_becomes_slashed() {
        assert_eq!(normalize_method_path("identity.me.scopes").unwrap(), "identity/me/scopes");
    }

    #[test]
    fn test_dots_inside_slashed_path_are_preserved() {
        assert_eq!(normalize_method_path("files/get.v2").unwrap(), "files/get.v2");
    }

    #[test]
    fn test_strip_leading_trailing_separators() {
        assert_eq!(normalize_method_path("/system/ping/").unwrap(), "system/ping");
        assert_eq!(normalize_method_path(".system.ping.").unwrap(), "system/ping");
    }

    #[test]
    fn test_collapse_doubled_separators() {
        assert_eq!(normalize_method_path("system//ping").unwrap(), "system/ping");
    }

    #[test]
    fn test_single_segment() {
        assert_eq!(normalize_method_path("echo").unwrap(), "echo");
    }

    #[test]
    fn test_reject_empty() {
        assert_eq!(normalize_method_path(""), Err(MethodPathError::Empty));
        assert_eq!(normalize_method_path("   "), Err(MethodPathError::Empty));
    }

    #[test]
    fn test_reject_only_separators() {
        assert_eq!(normalize_method_path("///"), Err(MethodPathError::Empty));
    }

    #[test]
    fn test_reject_null_byte() {
        assert_eq!(normalize_method_path("system/pi\0ng"), Err(MethodPathError::NullByte));
    }

    #[test]
    fn test_reject_whitespace_segment() {
        assert!(matches!(
            normalize_method_path("system/ /ping"),
            Err(MethodPathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_reject_too_long() {
        let long_path = "a/".repeat(300);
        assert_eq!(normalize_method_path(&long_path), Err(MethodPathError::TooLong));
    }

    #[test]
    fn test_join_segments() {
        assert_eq!(join_segments(&["a", "b", "c"]), "a/b/c");
        assert_eq!(join_segments(&[String::from("solo")]), "solo");
    }
}
