//! Safe `${VAR}` environment expansion.
//!
//! Used for auth secrets, header values, and connector-definition fields.
//! Identifiers must match `^[A-Za-z_][A-Za-z0-9_]*$`; an unclosed `${`, an
//! empty or invalid name, and a missing variable each produce a distinct
//! error quoting the offending input. Literal values pass through untouched.

use maestro_types::error::EngineError;

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand every `${NAME}` token in `input` from the process environment,
/// left to right.
pub fn expand_env(input: &str) -> Result<String, EngineError> {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expansion against an arbitrary lookup, for tests and custom sources.
pub fn expand_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, EngineError> {
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            return Err(EngineError::validation(format!(
                "unclosed '${{' in '{input}'"
            )));
        };

        let name = &after[..end];
        if name.is_empty() {
            return Err(EngineError::validation(format!(
                "empty variable name in '{input}'"
            )));
        }
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char);
        if !valid {
            return Err(EngineError::validation(format!(
                "invalid variable name '{name}' in '{input}'"
            )));
        }

        let value = lookup(name).ok_or_else(|| {
            EngineError::auth(format!(
                "environment variable '{name}' referenced by '{input}' is not set"
            ))
            .with_suggestion(format!("Export {name} before starting the engine"))
        })?;
        result.push_str(&value);

        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::error::ErrorKind;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_literal_passthrough() {
        let lookup = env(&[]);
        assert_eq!(expand_with("plain value", &lookup).unwrap(), "plain value");
        assert_eq!(expand_with("", &lookup).unwrap(), "");
        // A lone `$` without `{` is literal.
        assert_eq!(expand_with("cost is $5", &lookup).unwrap(), "cost is $5");
    }

    #[test]
    fn test_single_expansion() {
        let lookup = env(&[("GITHUB_TOKEN", "ghx")]);
        assert_eq!(expand_with("${GITHUB_TOKEN}", &lookup).unwrap(), "ghx");
        assert_eq!(
            expand_with("Bearer ${GITHUB_TOKEN}!", &lookup).unwrap(),
            "Bearer ghx!"
        );
    }

    #[test]
    fn test_multiple_expansions_left_to_right() {
        let lookup = env(&[("A", "1"), ("B", "2")]);
        assert_eq!(expand_with("${A}-${B}-${A}", &lookup).unwrap(), "1-2-1");
    }

    #[test]
    fn test_unclosed_brace() {
        let err = expand_with("${UNCLOSED", &env(&[])).unwrap_err();
        assert!(err.message.contains("unclosed"));
        assert!(err.message.contains("${UNCLOSED"));
    }

    #[test]
    fn test_empty_name() {
        let err = expand_with("x${}y", &env(&[])).unwrap_err();
        assert!(err.message.contains("empty variable name"));
    }

    #[test]
    fn test_invalid_names() {
        for input in ["${1BAD}", "${BAD-NAME}", "${BAD NAME}", "${.}"] {
            let err = expand_with(input, &env(&[])).unwrap_err();
            assert!(err.message.contains("invalid variable name"), "{input}");
            assert_eq!(err.kind, ErrorKind::Validation);
        }
    }

    #[test]
    fn test_missing_variable_is_auth_error() {
        let err = expand_with("${NOPE_NOT_SET}", &env(&[])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(err.message.contains("NOPE_NOT_SET"));
    }

    #[test]
    fn test_underscore_names_allowed() {
        let lookup = env(&[("_PRIVATE", "p"), ("WITH_9", "n")]);
        assert_eq!(expand_with("${_PRIVATE}${WITH_9}", &lookup).unwrap(), "pn");
    }

    #[test]
    fn test_process_env_roundtrip() {
        // set_var is unsafe as of edition 2024; the name is unique to this
        // test so no other thread reads it concurrently.
        unsafe { std::env::set_var("MAESTRO_ENV_TEST_VAR", "ok") };
        assert_eq!(expand_env("${MAESTRO_ENV_TEST_VAR}").unwrap(), "ok");
        unsafe { std::env::remove_var("MAESTRO_ENV_TEST_VAR") };
    }
}
