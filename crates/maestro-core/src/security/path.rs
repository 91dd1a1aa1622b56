//! Path-parameter sanitization.
//!
//! Every `{name}` placeholder value substituted into an operation path is
//! screened here before percent-encoding. Rejected: `../`, `..\`, any
//! percent-encoded traversal variant, a literal NUL, or `%00`.

use maestro_types::error::EngineError;

/// Traversal sequences rejected in path parameters, checked against the
/// lowercased value.
const TRAVERSAL_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e/",
    "%2e%2e\\",
    "%2e%2e%2f",
    "%2e%2e%5c",
    "..%2f",
    "..%5c",
];

/// Validate a single path-parameter value.
///
/// `name` is the placeholder name, used in the error message so callers can
/// tell which parameter was poisoned.
pub fn validate_path_parameter(name: &str, value: &str) -> Result<(), EngineError> {
    if value.contains('\0') {
        return Err(EngineError::path_injection(format!(
            "path parameter '{name}' contains a NUL byte"
        )));
    }

    let lowered = value.to_ascii_lowercase();
    if lowered.contains("%00") {
        return Err(EngineError::path_injection(format!(
            "path parameter '{name}' contains an encoded NUL (%00)"
        )));
    }

    for pattern in TRAVERSAL_PATTERNS {
        if lowered.contains(pattern) {
            return Err(EngineError::path_injection(format!(
                "path parameter '{name}' contains a traversal sequence ('{pattern}')"
            ))
            .with_suggestion("Path parameters may not navigate outside their segment"));
        }
    }

    // A bare trailing ".." still escapes once a separator is appended
    // downstream.
    if lowered == ".." || lowered.ends_with("/..") || lowered.ends_with("\\..") {
        return Err(EngineError::path_injection(format!(
            "path parameter '{name}' contains a traversal sequence ('..')"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::error::ErrorKind;

    #[test]
    fn test_clean_values_pass() {
        for value in ["octocat", "my-repo", "v1.2.3", "a_b", "issue 42", "caf\u{e9}"] {
            assert!(validate_path_parameter("owner", value).is_ok(), "{value}");
        }
    }

    #[test]
    fn test_all_traversal_variants_rejected() {
        for value in [
            "../etc",
            "..\\windows",
            "%2e%2e/secret",
            "%2e%2e\\secret",
            "%2E%2E%2Fsecret",
            "%2e%2e%5csecret",
            "..%2fsecret",
            "..%5Csecret",
            "../../etc",
        ] {
            let err = validate_path_parameter("owner", value).unwrap_err();
            assert_eq!(err.kind, ErrorKind::PathInjection, "{value}");
            assert!(err.message.contains("owner"), "{value}");
        }
    }

    #[test]
    fn test_nul_rejected() {
        let err = validate_path_parameter("repo", "a\0b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathInjection);

        let err = validate_path_parameter("repo", "a%00b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathInjection);
        let err = validate_path_parameter("repo", "a%00").unwrap_err();
        assert!(err.message.contains("repo"));
    }

    #[test]
    fn test_bare_dotdot_rejected() {
        assert!(validate_path_parameter("p", "..").is_err());
        assert!(validate_path_parameter("p", "a/..").is_err());
    }

    #[test]
    fn test_dots_inside_names_allowed() {
        assert!(validate_path_parameter("file", "notes.md").is_ok());
        assert!(validate_path_parameter("file", "a..b").is_ok());
    }
}
