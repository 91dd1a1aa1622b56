//! Step-reference validation for condition expressions.
//!
//! Before evaluation, an expression is scanned for `steps.<id>` references
//! (both the bare form and the `{{.steps.<id>...}}` template form). Every
//! referenced id must exist in the workflow's declared steps. Extraction is
//! cached process-globally by expression text.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use maestro_types::error::EngineError;

/// Process-global cache of extracted references, keyed by expression text.
static REFERENCE_CACHE: OnceLock<RwLock<HashMap<String, Arc<Vec<String>>>>> = OnceLock::new();

fn cache() -> &'static RwLock<HashMap<String, Arc<Vec<String>>>> {
    REFERENCE_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract the step ids referenced by an expression, in order of first
/// appearance.
///
/// Recognized forms: `steps.<id>` where the token is not part of a longer
/// identifier, and the template form `{{.steps.<id>...}}`.
pub fn extract_step_references(expression: &str) -> Arc<Vec<String>> {
    // Fast path under the read lock; double-checked on miss.
    if let Ok(map) = cache().read() {
        if let Some(found) = map.get(expression) {
            return Arc::clone(found);
        }
    }

    let refs = Arc::new(scan_references(expression));
    if let Ok(mut map) = cache().write() {
        if let Some(found) = map.get(expression) {
            return Arc::clone(found);
        }
        map.insert(expression.to_string(), Arc::clone(&refs));
    }
    refs
}

fn scan_references(expression: &str) -> Vec<String> {
    const TOKEN: &str = "steps.";
    let mut refs: Vec<String> = Vec::new();
    let bytes = expression.as_bytes();

    let mut search_from = 0;
    while let Some(found) = expression[search_from..].find(TOKEN) {
        let idx = search_from + found;
        search_from = idx + TOKEN.len();

        // `steps.` must start a path: nothing before it, a non-identifier
        // character, or the template prefix `{{.`.
        if idx > 0 {
            let prev = bytes[idx - 1] as char;
            if is_ident_char(prev) {
                continue;
            }
            if prev == '.' {
                let before = &expression[..idx - 1];
                if !before.ends_with("{{") {
                    continue;
                }
            }
        }

        let id: String = expression[idx + TOKEN.len()..]
            .chars()
            .take_while(|c| is_ident_char(*c))
            .collect();
        if !id.is_empty() && !refs.contains(&id) {
            refs.push(id);
        }
    }

    refs
}

/// Validate that every step referenced by `expression` is a declared step.
///
/// On failure the error lists the unknown ids and the known ids, e.g.
/// `unknown step(s): missing (known steps: check, build)`.
pub fn validate_step_references(
    expression: &str,
    known_steps: &[String],
) -> Result<(), EngineError> {
    let refs = extract_step_references(expression);
    let unknown: Vec<&String> = refs
        .iter()
        .filter(|id| !known_steps.contains(id))
        .collect();

    if unknown.is_empty() {
        return Ok(());
    }

    let unknown_list = unknown
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(EngineError::validation(format!(
        "unknown step(s): {unknown_list} (known steps: {})",
        known_steps.join(", ")
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_references() {
        let refs = extract_step_references("steps.check.ok && steps.build.output != null");
        assert_eq!(&**refs, &["check".to_string(), "build".to_string()]);
    }

    #[test]
    fn test_extract_template_references() {
        let refs = extract_step_references("{{.steps.fetch.output.title}} == 'bug'");
        assert_eq!(&**refs, &["fetch".to_string()]);
    }

    #[test]
    fn test_extract_dedups_preserving_order() {
        let refs = extract_step_references("steps.a.x || steps.b.y || steps.a.z");
        assert_eq!(&**refs, &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_extract_ignores_longer_identifiers() {
        let refs = extract_step_references("mysteps.check.ok");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_extract_ignores_nested_paths() {
        // `inputs.steps.x` is a path into the inputs object, not a step ref.
        let refs = extract_step_references("inputs.steps.x == 1");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_validate_known_references_pass() {
        let known = vec!["check".to_string(), "build".to_string()];
        assert!(validate_step_references("steps.check.ok && steps.build.ok", &known).is_ok());
    }

    #[test]
    fn test_validate_unknown_reference_message() {
        let known = vec!["check".to_string(), "build".to_string()];
        let err =
            validate_step_references("steps.check.ok && steps.missing.ok", &known).unwrap_err();
        assert!(
            err.message
                .contains("unknown step(s): missing (known steps: check, build)"),
            "{}",
            err.message
        );
    }

    #[test]
    fn test_validate_empty_expression_passes() {
        assert!(validate_step_references("", &["a".to_string()]).is_ok());
    }

    #[test]
    fn test_cache_returns_same_result() {
        let first = extract_step_references("steps.cached.ok");
        let second = extract_step_references("steps.cached.ok");
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
