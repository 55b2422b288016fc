// Change descriptors: the constrained patch algebra shared with the remote
// authority. The wire shape is the historical operator map
// `{"$set": {..}, "$unset": {..}, "$push": {..}, "$pull": {..}, "$inc": {..}}`;
// internal consumers iterate the closed [`Change`] sum type instead of
// matching on `$`-prefixed strings.
use crate::path::{Path, resolve_mut, set_path, unset_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operator vocabulary surfaced to field observers.
///
/// `$inc` never appears here: an increment surfaces to observers as a `Set`
/// of the resulting value, not as a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Set,
    Unset,
    Push,
    Pull,
}

/// One decoded change, addressed by a typed [`Path`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Unset { path: Path },
    Pull { path: Path, value: Value },
    Set { path: Path, value: Value },
    Push { path: Path, value: Value },
    Inc { path: Path, amount: Value },
}

/// A full change descriptor. Operators always apply in a fixed order:
/// unset, pull, set, push, inc. Preserving that order is required for
/// byte-identical behavior when a set and a push target the same path.
///
/// ```
/// use serde_json::json;
/// use tabula_patch::ChangeSet;
///
/// let changes: ChangeSet = serde_json::from_value(json!({
///     "$set": {"name": "Mordecai"},
///     "$inc": {"hp": -3},
/// })).expect("decode");
///
/// let mut doc = json!({"hp": 10});
/// changes.apply(&mut doc, None);
/// assert_eq!(doc, json!({"hp": 7, "name": "Mordecai"}));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(rename = "$unset", default, skip_serializing_if = "Map::is_empty")]
    unset: Map<String, Value>,
    #[serde(rename = "$pull", default, skip_serializing_if = "Map::is_empty")]
    pull: Map<String, Value>,
    #[serde(rename = "$set", default, skip_serializing_if = "Map::is_empty")]
    set: Map<String, Value>,
    #[serde(rename = "$push", default, skip_serializing_if = "Map::is_empty")]
    push: Map<String, Value>,
    #[serde(rename = "$inc", default, skip_serializing_if = "Map::is_empty")]
    inc: Map<String, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.set.insert(path.into(), value);
        self
    }

    pub fn unset(&mut self, path: impl Into<String>) -> &mut Self {
        self.unset.insert(path.into(), Value::Null);
        self
    }

    pub fn push(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.push.insert(path.into(), value);
        self
    }

    pub fn pull(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.pull.insert(path.into(), value);
        self
    }

    pub fn inc(&mut self, path: impl Into<String>, amount: Value) -> &mut Self {
        self.inc.insert(path.into(), amount);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.unset.is_empty()
            && self.pull.is_empty()
            && self.set.is_empty()
            && self.push.is_empty()
            && self.inc.is_empty()
    }

    /// True when the descriptor is a single `$set` group and nothing else —
    /// the one shape consumers may interpret incrementally without risking a
    /// partial merge. Anything more ambiguous should trigger a full re-fetch
    /// of canonical state.
    pub fn is_simple_set(&self) -> bool {
        !self.set.is_empty()
            && self.unset.is_empty()
            && self.pull.is_empty()
            && self.push.is_empty()
            && self.inc.is_empty()
    }

    /// Iterate the descriptor in application order.
    pub fn iter(&self) -> impl Iterator<Item = Change> + '_ {
        let unsets = self.unset.keys().map(|path| Change::Unset {
            path: Path::from(path),
        });
        let pulls = self.pull.iter().map(|(path, value)| Change::Pull {
            path: Path::from(path),
            value: value.clone(),
        });
        let sets = self.set.iter().map(|(path, value)| Change::Set {
            path: Path::from(path),
            value: value.clone(),
        });
        let pushes = self.push.iter().map(|(path, value)| Change::Push {
            path: Path::from(path),
            value: value.clone(),
        });
        let incs = self.inc.iter().map(|(path, amount)| Change::Inc {
            path: Path::from(path),
            amount: amount.clone(),
        });
        unsets.chain(pulls).chain(sets).chain(pushes).chain(incs)
    }

    /// Apply every operator to `target`, invoking `observer` once per field
    /// actually touched. Applying an identical descriptor to two deep-equal
    /// documents yields deep-equal results; `$push` alone is intentionally
    /// non-idempotent, mirroring the authority's append semantics.
    pub fn apply(
        &self,
        target: &mut Value,
        mut observer: Option<&mut dyn FnMut(ChangeOp, &str, &Value)>,
    ) {
        for (key, _) in &self.unset {
            let path = Path::from(key);
            unset_path(target, &path);
            if let Some(observer) = observer.as_deref_mut() {
                observer(ChangeOp::Unset, key, &Value::Null);
            }
        }
        for (key, value) in &self.pull {
            let path = Path::from(key);
            // Deep equality, matching a MongoDB-style pull; only the first
            // match is removed, and the observer fires only on removal.
            if let Some(Value::Array(items)) = resolve_mut(target, &path) {
                if let Some(index) = items.iter().position(|item| item == value) {
                    items.remove(index);
                    if let Some(observer) = observer.as_deref_mut() {
                        observer(ChangeOp::Pull, key, value);
                    }
                }
            }
        }
        for (key, value) in &self.set {
            let path = Path::from(key);
            set_path(target, &path, value.clone());
            if let Some(observer) = observer.as_deref_mut() {
                observer(ChangeOp::Set, key, value);
            }
        }
        for (key, value) in &self.push {
            let path = Path::from(key);
            match resolve_mut(target, &path) {
                Some(Value::Array(items)) => {
                    items.push(value.clone());
                }
                // An existing non-sequence target swallows the push.
                Some(_) => continue,
                // Push self-initializes an absent target.
                None => set_path(target, &path, Value::Array(vec![value.clone()])),
            }
            if let Some(observer) = observer.as_deref_mut() {
                observer(ChangeOp::Push, key, value);
            }
        }
        for (key, amount) in &self.inc {
            let path = Path::from(key);
            let current = crate::path::resolve(target, &path)
                .cloned()
                .unwrap_or(Value::from(0));
            let updated = match (current.as_i64(), amount.as_i64()) {
                (Some(current), Some(amount)) => Value::from(current + amount),
                _ => Value::from(current.as_f64().unwrap_or(0.0) + amount.as_f64().unwrap_or(0.0)),
            };
            set_path(target, &path, updated.clone());
            if let Some(observer) = observer.as_deref_mut() {
                observer(ChangeOp::Set, key, &updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ChangeSet {
        serde_json::from_value(value).expect("decode change set")
    }

    #[test]
    fn wire_round_trip_preserves_all_operators() {
        let changes = decode(json!({
            "$set": {"a": 1},
            "$unset": {"b": null},
            "$push": {"c": "x"},
            "$pull": {"d": "y"},
            "$inc": {"e": 2},
        }));
        let encoded = serde_json::to_value(&changes).expect("encode");
        assert_eq!(decode(encoded), changes);
    }

    #[test]
    fn empty_operator_groups_are_omitted_on_the_wire() {
        let mut changes = ChangeSet::new();
        changes.set("hp", json!(7));
        let encoded = serde_json::to_value(&changes).expect("encode");
        assert_eq!(encoded, json!({"$set": {"hp": 7}}));
    }

    #[test]
    fn inc_surfaces_as_a_set_of_the_result() {
        let changes = decode(json!({"$inc": {"hp": -3}}));
        let mut doc = json!({"hp": 10, "permissions": {"*": {"*": 2}}});
        let mut seen = Vec::new();
        changes.apply(
            &mut doc,
            Some(&mut |op, path, value| seen.push((op, path.to_owned(), value.clone()))),
        );
        assert_eq!(doc["hp"], json!(7));
        assert_eq!(seen, vec![(ChangeOp::Set, "hp".to_owned(), json!(7))]);
    }

    #[test]
    fn inc_treats_missing_values_as_zero() {
        let changes = decode(json!({"$inc": {"shield": 5}}));
        let mut doc = json!({});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"shield": 5}));
    }

    #[test]
    fn pull_removes_the_first_deep_equal_element() {
        let changes = decode(json!({"$pull": {"tags": "a"}}));
        let mut doc = json!({"tags": ["a", "b", "a"]});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"tags": ["b", "a"]}));
    }

    #[test]
    fn pull_on_a_missing_sequence_is_silent() {
        let changes = decode(json!({"$pull": {"tags": "a"}}));
        let mut doc = json!({});
        let mut fired = 0;
        changes.apply(&mut doc, Some(&mut |_, _, _| fired += 1));
        assert_eq!(doc, json!({}));
        assert_eq!(fired, 0);
    }

    #[test]
    fn pull_matches_object_values_deeply() {
        let changes = decode(json!({"$pull": {"combatants": {"id": "c2", "hp": 4}}}));
        let mut doc = json!({"combatants": [{"id": "c1", "hp": 9}, {"id": "c2", "hp": 4}]});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"combatants": [{"id": "c1", "hp": 9}]}));
    }

    #[test]
    fn push_self_initializes_an_absent_sequence() {
        let changes = decode(json!({"$push": {"ability_order": "ab1"}}));
        let mut doc = json!({});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"ability_order": ["ab1"]}));
    }

    #[test]
    fn operators_apply_in_fixed_order() {
        // Set establishes the container before push appends to it; were the
        // order reversed, the set would clobber the pushed element.
        let changes = decode(json!({
            "$set": {"tags": []},
            "$push": {"tags": "fresh"},
        }));
        let mut doc = json!({"tags": ["stale"]});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"tags": ["fresh"]}));
    }

    #[test]
    fn unset_before_pull_before_set() {
        let changes = decode(json!({
            "$unset": {"marker": null},
            "$pull": {"tags": "old"},
            "$set": {"marker": "new"},
        }));
        let mut doc = json!({"marker": 1, "tags": ["old", "kept"]});
        changes.apply(&mut doc, None);
        assert_eq!(doc, json!({"marker": "new", "tags": ["kept"]}));
    }

    #[test]
    fn identical_descriptors_are_deterministic() {
        let changes = decode(json!({
            "$set": {"a.b": 1, "z": true},
            "$unset": {"gone": null},
            "$inc": {"count": 2},
            "$push": {"log": "entry"},
        }));
        let base = json!({"gone": "x", "count": 5, "log": []});
        let mut left = base.clone();
        let mut right = base;
        changes.apply(&mut left, None);
        changes.apply(&mut right, None);
        assert_eq!(left, right);
    }

    #[test]
    fn simple_set_predicate() {
        let simple = decode(json!({"$set": {"hp": 1}}));
        assert!(simple.is_simple_set());
        let mixed = decode(json!({"$set": {"hp": 1}, "$inc": {"mp": 1}}));
        assert!(!mixed.is_simple_set());
        assert!(!ChangeSet::new().is_simple_set());
    }

    #[test]
    fn iter_yields_application_order() {
        let changes = decode(json!({
            "$push": {"log": 1},
            "$set": {"a": 2},
            "$unset": {"b": null},
        }));
        let kinds: Vec<_> = changes
            .iter()
            .map(|change| match change {
                Change::Unset { .. } => "unset",
                Change::Pull { .. } => "pull",
                Change::Set { .. } => "set",
                Change::Push { .. } => "push",
                Change::Inc { .. } => "inc",
            })
            .collect();
        assert_eq!(kinds, vec!["unset", "set", "push"]);
    }
}
