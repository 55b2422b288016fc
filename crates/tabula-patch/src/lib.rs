// Patch algebra for partially-known, permission-filtered documents.
//
// Two layers:
// - `path`: dotted-path get/set/unset over nested JSON mappings.
// - `change`: the five-operator change descriptor applied through those
//   paths, with an optional per-field observer for UI reactivity.
//
// Nothing in this crate returns errors for missing data. Documents here are
// partial views by construction, so every operation degrades to a no-op or
// `None` instead; failures only become visible in the orchestration layers
// that own a user-facing action.

mod change;
mod path;

pub use change::{Change, ChangeOp, ChangeSet};
pub use path::{Path, resolve, set_path, unset_path};

use serde_json::{Map, Value};

/// Recursively test whether any mapping key in `value` starts with `$`.
///
/// Used at the message-handling boundary to tell a full-document replacement
/// apart from a change descriptor.
///
/// ```
/// use serde_json::json;
/// use tabula_patch::contains_operators;
///
/// assert!(contains_operators(&json!({"$set": {"hp": 1}})));
/// assert!(contains_operators(&json!({"nested": [{"$pull": {"a": 1}}]})));
/// assert!(!contains_operators(&json!({"hp": 1, "tags": ["$free"]})));
/// ```
pub fn contains_operators(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(contains_operators),
        Value::Object(map) => map
            .iter()
            .any(|(key, value)| key.starts_with('$') || contains_operators(value)),
        _ => false,
    }
}

/// Expand dotted keys inside a document into nested mappings:
/// `{"a.b": 1}` becomes `{"a": {"b": 1}}`, recursively.
///
/// The authority stores some documents with flattened paths; inflating them
/// once at the boundary keeps the in-memory shape uniformly nested.
pub fn inflate(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let mut result = Value::Object(Map::new());
    for (key, nested) in map {
        set_path(&mut result, &Path::from(key), inflate(nested));
    }
    result
}
