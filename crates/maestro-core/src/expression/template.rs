//! Template preprocessing for condition expressions.
//!
//! Conditions written in template form carry `{{.path}}` placeholders that
//! must become expression literals before evaluation: strings are quoted
//! with backslash escaping, numbers stay unquoted, booleans and null are
//! emitted as literals, and arrays/objects are inlined as compact JSON.
//! A failed path lookup is a `path not found` error naming the missing
//! segment.

use maestro_types::error::EngineError;
use serde_json::Value;

/// Resolve every `{{.path}}` placeholder in `expression` against `context`
/// and replace it with an expression literal.
pub fn preprocess_template(expression: &str, context: &Value) -> Result<String, EngineError> {
    let mut result = String::with_capacity(expression.len());
    let mut rest = expression;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(EngineError::validation(format!(
                "unclosed template placeholder in '{expression}'"
            )));
        };

        let inner = after[..end].trim();
        let Some(path) = inner.strip_prefix('.') else {
            return Err(EngineError::validation(format!(
                "template placeholder '{{{{{inner}}}}}' must start with '.'"
            )));
        };

        let value = lookup_path(context, path)?;
        result.push_str(&value_to_literal(value)?);

        rest = &after[end + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve `{{ ... }}` placeholders in a display string (prompts, output
/// templates). Paths may be written with or without the leading dot.
/// Unresolvable references are left as-is, never an error: a dry-run preview
/// of a half-filled context should show the remaining placeholders.
pub fn resolve_string_template(template: &str, context: &Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };

        let inner = after[..end].trim();
        let path = inner.strip_prefix('.').unwrap_or(inner);
        match lookup_path(context, path) {
            Ok(value) => result.push_str(&value_to_display(value)),
            Err(_) => {
                // Leave the placeholder untouched.
                result.push_str(&rest[start..start + 2 + end + 2]);
            }
        }
        rest = &after[end + 2..];
    }

    result.push_str(rest);
    result
}

/// Render a JSON value for display inside a resolved string.
fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Navigate a dotted path through a JSON object tree.
fn lookup_path<'a>(context: &'a Value, path: &str) -> Result<&'a Value, EngineError> {
    let mut current = context;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(EngineError::validation(format!(
                "path not found: empty segment in '.{path}'"
            )));
        }
        current = current.get(segment).ok_or_else(|| {
            EngineError::validation(format!("path not found: '{segment}' in '.{path}'"))
        })?;
    }
    Ok(current)
}

/// Render a JSON value as an expression literal.
fn value_to_literal(value: &Value) -> Result<String, EngineError> {
    Ok(match value {
        Value::String(s) => {
            let mut quoted = String::with_capacity(s.len() + 2);
            quoted.push('"');
            for c in s.chars() {
                match c {
                    '"' => quoted.push_str("\\\""),
                    '\\' => quoted.push_str("\\\\"),
                    '\n' => quoted.push_str("\\n"),
                    '\r' => quoted.push_str("\\r"),
                    '\t' => quoted.push_str("\\t"),
                    other => quoted.push(other),
                }
            }
            quoted.push('"');
            quoted
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        // Arrays and objects inline as compact JSON.
        other => serde_json::to_string(other)
            .map_err(|e| EngineError::validation(format!("unserializable template value: {e}")))?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "steps": {
                "fetch": {
                    "output": {
                        "title": "fix \"quoting\" bug",
                        "count": 7,
                        "open": true,
                        "assignee": null,
                        "labels": ["bug", "p1"],
                    }
                }
            },
            "inputs": {"env": "prod"}
        })
    }

    #[test]
    fn test_string_quoted_with_escaping() {
        let out =
            preprocess_template("{{.steps.fetch.output.title}} == 'x'", &context()).unwrap();
        assert_eq!(out, r#""fix \"quoting\" bug" == 'x'"#);
    }

    #[test]
    fn test_number_unquoted() {
        let out = preprocess_template("{{.steps.fetch.output.count}} > 3", &context()).unwrap();
        assert_eq!(out, "7 > 3");
    }

    #[test]
    fn test_bool_and_null_literals() {
        let out = preprocess_template(
            "{{.steps.fetch.output.open}} && {{.steps.fetch.output.assignee}} == null",
            &context(),
        )
        .unwrap();
        assert_eq!(out, "true && null == null");
    }

    #[test]
    fn test_array_inlined_as_json() {
        let out = preprocess_template("{{.steps.fetch.output.labels}}", &context()).unwrap();
        assert_eq!(out, r#"["bug","p1"]"#);
    }

    #[test]
    fn test_multiple_placeholders_left_to_right() {
        let out = preprocess_template(
            "{{.inputs.env}} == 'prod' && {{.steps.fetch.output.count}} > 0",
            &context(),
        )
        .unwrap();
        assert_eq!(out, r#""prod" == 'prod' && 7 > 0"#);
    }

    #[test]
    fn test_no_placeholders_identity() {
        let out = preprocess_template("steps.fetch.output.count > 3", &context()).unwrap();
        assert_eq!(out, "steps.fetch.output.count > 3");
    }

    #[test]
    fn test_missing_segment_names_it() {
        let err =
            preprocess_template("{{.steps.fetch.output.missing}}", &context()).unwrap_err();
        assert!(err.message.contains("path not found"));
        assert!(err.message.contains("'missing'"));
    }

    #[test]
    fn test_unclosed_placeholder_rejected() {
        let err = preprocess_template("{{.inputs.env", &context()).unwrap_err();
        assert!(err.message.contains("unclosed"));
    }

    #[test]
    fn test_placeholder_without_leading_dot_rejected() {
        let err = preprocess_template("{{inputs.env}}", &context()).unwrap_err();
        assert!(err.message.contains("must start with '.'"));
    }

    #[test]
    fn test_resolve_string_template_basic() {
        let out = resolve_string_template(
            "Summarize: {{ steps.fetch.output.title }} ({{ .inputs.env }})",
            &context(),
        );
        assert_eq!(out, "Summarize: fix \"quoting\" bug (prod)");
    }

    #[test]
    fn test_resolve_string_template_unknown_left_asis() {
        let out = resolve_string_template("{{ steps.ghost.output }} done", &context());
        assert_eq!(out, "{{ steps.ghost.output }} done");
    }

    #[test]
    fn test_resolve_string_template_unclosed_left_asis() {
        let out = resolve_string_template("before {{ steps.fetch", &context());
        assert_eq!(out, "before {{ steps.fetch");
    }

    #[test]
    fn test_preprocessed_expression_evaluates() {
        let eval = crate::expression::Evaluator::new();
        let out = preprocess_template(
            "{{.steps.fetch.output.count}} > 3 && {{.inputs.env}} == 'prod'",
            &context(),
        )
        .unwrap();
        assert!(eval.evaluate_condition(&out, &json!({})).unwrap());
    }
}
