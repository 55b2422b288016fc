// Dotted-path addressing over nested JSON mappings.
//
// All operations degrade to no-ops / `None` on missing or mismatched
// structure: the documents they run against are partial by design
// (permission-filtered views), so absence is normal, not exceptional.
use serde_json::{Map, Value};
use std::fmt;

/// Parsed dotted path, e.g. `"tokens.abc123.x"`.
///
/// ```
/// use tabula_patch::Path;
///
/// let path = Path::from("tokens.abc123.x");
/// assert_eq!(path.segments().len(), 3);
/// assert_eq!(path.to_string(), "tokens.abc123.x");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// An empty path addresses nothing; every operation on it is a no-op.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        let segments = if value.is_empty() {
            Vec::new()
        } else {
            value.split('.').map(str::to_owned).collect()
        };
        Self { segments }
    }
}

impl From<&String> for Path {
    fn from(value: &String) -> Self {
        Path::from(value.as_str())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Walk `path` through nested mappings. Returns `None` for an empty path or
/// when any step lands on a missing key or a non-mapping value.
pub fn resolve<'a>(object: &'a Value, path: &Path) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut cursor = object;
    for segment in path.segments() {
        match cursor {
            Value::Object(map) => cursor = map.get(segment)?,
            _ => return None,
        }
    }
    Some(cursor)
}

/// Mutable twin of [`resolve`]; used by operators that edit sequences in
/// place. Never vivifies.
pub(crate) fn resolve_mut<'a>(object: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    if path.is_empty() {
        return None;
    }
    let mut cursor = object;
    for segment in path.segments() {
        match cursor {
            Value::Object(map) => cursor = map.get_mut(segment)?,
            _ => return None,
        }
    }
    Some(cursor)
}

// Walk to the parent mapping of the final segment, creating an empty mapping
// at any absent or null intermediate. Returns `None` when a scalar blocks the
// path; writes degrade to no-ops there.
fn vivify_parent<'a>(
    object: &'a mut Value,
    path: &'a Path,
) -> Option<(&'a mut Map<String, Value>, &'a str)> {
    let (last, parents) = path.segments().split_last()?;
    let mut cursor = object;
    for segment in parents {
        let Value::Object(map) = cursor else {
            return None;
        };
        let slot = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        if !slot.is_object() {
            return None;
        }
        cursor = slot;
    }
    match cursor {
        Value::Object(map) => Some((map, last)),
        _ => None,
    }
}

/// Assign `value` at `path`, creating intermediate mappings as needed.
pub fn set_path(object: &mut Value, path: &Path, value: Value) {
    if let Some((parent, key)) = vivify_parent(object, path) {
        parent.insert(key.to_owned(), value);
    }
}

/// Remove the key addressed by `path`. Removing a missing key is a silent
/// no-op; intermediate mappings are created by the same traversal as
/// [`set_path`].
pub fn unset_path(object: &mut Value, path: &Path) {
    if let Some((parent, key)) = vivify_parent(object, path) {
        parent.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_set_then_resolve() {
        let mut doc = json!({});
        let path = Path::from("tokens.abc123.x");
        set_path(&mut doc, &path, json!(42));
        assert_eq!(resolve(&doc, &path), Some(&json!(42)));
        assert_eq!(doc, json!({"tokens": {"abc123": {"x": 42}}}));
    }

    #[test]
    fn resolve_missing_intermediate_is_none() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(resolve(&doc, &Path::from("a.c.d")), None);
        assert_eq!(resolve(&doc, &Path::from("a.b.c")), None);
    }

    #[test]
    fn resolve_empty_path_is_none() {
        let doc = json!({"a": 1});
        assert_eq!(resolve(&doc, &Path::from("")), None);
    }

    #[test]
    fn set_through_scalar_is_a_no_op() {
        let mut doc = json!({"a": 5});
        set_path(&mut doc, &Path::from("a.b"), json!(1));
        assert_eq!(doc, json!({"a": 5}));
    }

    #[test]
    fn set_through_null_vivifies() {
        let mut doc = json!({"a": null});
        set_path(&mut doc, &Path::from("a.b"), json!(1));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn unset_is_idempotent() {
        let mut once = json!({"a": {"b": 1, "c": 2}});
        let path = Path::from("a.b");
        unset_path(&mut once, &path);
        let mut twice = once.clone();
        unset_path(&mut twice, &path);
        assert_eq!(once, twice);
        assert_eq!(once, json!({"a": {"c": 2}}));
    }

    #[test]
    fn unset_vivifies_intermediates_like_set() {
        let mut doc = json!({});
        unset_path(&mut doc, &Path::from("a.b"));
        assert_eq!(doc, json!({"a": {}}));
    }
}
