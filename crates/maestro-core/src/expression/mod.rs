//! JEXL expression evaluation for condition gates and replay guards.
//!
//! Wraps `jexl_eval::Evaluator` with the engine's standard transforms and
//! enforces the condition contract: empty expressions are true, and a
//! non-boolean result is a validation error rather than a truthy coercion.
//!
//! **Security note:** payloads are always passed as context objects, never
//! interpolated into expression strings. Caller-supplied values entering an
//! expression go through template preprocessing ([`template`]), which emits
//! literals with escaping.

pub mod template;
pub mod transform;
pub mod validate;

use maestro_types::error::EngineError;
use serde_json::{Value, json};

/// Expression evaluator with the engine's standard transforms registered.
///
/// Used for step `condition` gates, replay guards, and trigger filters.
pub struct Evaluator {
    inner: jexl_eval::Evaluator<'static>,
}

impl Evaluator {
    /// Create an evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let inner = jexl_eval::Evaluator::new()
            // Collection/string length
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            // Array membership: `tags|has('rust')`
            .with_transform("has", |args: &[Value]| {
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                let found = match args.first() {
                    Some(Value::Array(items)) => items.contains(&needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            // Alias of `has`, array or string containment
            .with_transform("includes", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::String(s)), Some(Value::String(needle))) => {
                        s.contains(needle.as_str())
                    }
                    _ => false,
                };
                Ok(json!(found))
            })
            // Substring search
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            });

        Self { inner }
    }

    /// Evaluate a condition expression to a boolean.
    ///
    /// An empty (or all-whitespace) expression evaluates to `true`. A result
    /// of any other type is a validation error.
    pub fn evaluate_condition(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<bool, EngineError> {
        if expression.trim().is_empty() {
            return Ok(true);
        }

        match self.evaluate_value(expression, context)? {
            Value::Bool(b) => Ok(b),
            other => Err(EngineError::validation(format!(
                "condition '{expression}' did not evaluate to a boolean (got {other})"
            ))),
        }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, EngineError> {
        if !context.is_object() {
            return Err(EngineError::validation(
                "expression context must be a JSON object",
            ));
        }

        self.inner
            .eval_in_context(expression, context)
            .map_err(|e| EngineError::validation(format!(
                "expression '{expression}' failed to evaluate: {e}"
            )))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
