//! Structured-output recovery helpers.
//!
//! Model responses that should be JSON routinely arrive wrapped in
//! markdown code fences or quotes; these helpers strip the wrappers,
//! parse, and validate against an optional JSON Schema.

use serde_json::Value;

/// Strip wrapping code-fence markers and surrounding quotes from raw
/// model output.
pub fn strip_wrappers(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("json", "JSON", ...) up to the first newline
        let rest = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        text = match rest.rfind("```") {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        text = text.trim();
    }

    if text.len() >= 2 {
        let quoted = (text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\''));
        if quoted {
            text = text[1..text.len() - 1].trim();
        }
    }

    text
}

/// Strip wrappers and parse the result as JSON.
pub fn parse_structured(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_wrappers(raw))
}

/// Validate a parsed value against a JSON Schema.
///
/// Returns a compact message with the first few validation errors
/// (bounded to keep retry prompts and logs readable). A schema that
/// fails to compile is reported the same way.
pub fn validate_against_schema(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return Err(format!("invalid schema: {e}")),
    };

    if validator.is_valid(instance) {
        return Ok(());
    }

    const MAX_ERRORS: usize = 5;
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .take(MAX_ERRORS)
        .map(|e| e.to_string())
        .collect();

    Err(errors.join("; "))
}
