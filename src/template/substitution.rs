//! Variable substitution engine for prompt bodies

use std::collections::HashMap;

/// Substitute `{{variable}}` placeholders in a prompt body.
///
/// Placeholders are ASCII `{{`, an identifier (`[A-Za-z0-9_]`), `}}`,
/// case-sensitive, no nesting. Keys present in the body but absent from
/// the map are left as literal `{{key}}` text. The body is scanned in a
/// single pass, so substituted values are never re-expanded.
pub fn substitute_variables(body: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        match placeholder_key(after_open) {
            Some(key) => {
                let consumed = open + 2 + key.len() + 2;
                match variables.get(key) {
                    Some(value) => result.push_str(value),
                    // Unknown key: keep the placeholder literal
                    None => {
                        result.push_str("{{");
                        result.push_str(key);
                        result.push_str("}}");
                    }
                }
                rest = &rest[consumed..];
            }
            // Not a well-formed placeholder; emit the braces and move on
            None => {
                result.push_str("{{");
                rest = after_open;
            }
        }
    }

    result.push_str(rest);
    result
}

/// List the distinct placeholder keys in a body, in order of first appearance.
pub fn extract_placeholders(body: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        match placeholder_key(after_open) {
            Some(key) => {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
                rest = &after_open[key.len() + 2..];
            }
            None => rest = after_open,
        }
    }

    keys
}

/// Parse the identifier of a placeholder whose `{{` has just been consumed.
///
/// Returns `None` unless a non-empty identifier is immediately followed
/// by `}}`.
fn placeholder_key(after_open: &str) -> Option<&str> {
    let end = after_open
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(after_open.len());

    if end == 0 || !after_open[end..].starts_with("}}") {
        return None;
    }

    Some(&after_open[..end])
}
