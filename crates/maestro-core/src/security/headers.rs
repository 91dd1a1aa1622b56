//! Outbound header screening.
//!
//! Header values are rejected if they contain CR, LF, or NUL (injection);
//! header names are rejected if they would override framing or routing
//! (`content-length`, `content-encoding`, `transfer-encoding`, `host`).

use maestro_types::error::EngineError;

/// Header names the engine refuses to let definitions set.
const FORBIDDEN_NAMES: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "host",
];

/// Validate one outbound header name/value pair.
pub fn validate_header(name: &str, value: &str) -> Result<(), EngineError> {
    let lowered = name.to_ascii_lowercase();
    if FORBIDDEN_NAMES.contains(&lowered.as_str()) {
        return Err(EngineError::validation(format!(
            "header '{name}' may not be set by a connector definition"
        )));
    }

    for (position, byte) in value.bytes().enumerate() {
        if byte == b'\r' || byte == b'\n' || byte == 0 {
            return Err(EngineError::validation(format!(
                "header '{name}' value contains an invalid character at position {position}"
            ))
            .with_suggestion("Header values may not contain CR, LF, or NUL"));
        }
    }

    Ok(())
}
