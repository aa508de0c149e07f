//! Structural JSON diff
//!
//! Produces an explicit edit script: one [`Edit`] per path where the two
//! documents differ. Objects are compared key by key and arrays index by
//! index; any other difference (including a type change) is a `Changed`
//! edit at that path.

use std::collections::BTreeSet;

use serde_json::Value;

/// What happened at a path
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    Added(Value),
    Removed(Value),
    Changed { from: Value, to: Value },
}

/// One difference between two documents
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub path: Vec<String>,
    pub op: EditOp,
}

impl Edit {
    /// The edit is at `prefix` or somewhere beneath it
    pub fn is_under(&self, prefix: &[&str]) -> bool {
        self.path.len() >= prefix.len() && self.path.iter().zip(prefix).all(|(a, b)| a == b)
    }

    /// The edit replaces an ancestor of `path` (or `path` itself)
    pub fn covers(&self, path: &[&str]) -> bool {
        self.path.len() <= path.len() && self.path.iter().zip(path).all(|(a, b)| a == b)
    }
}

/// Edit script between a previous and a new state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    edits: Vec<Edit>,
}

impl StateDiff {
    pub fn compute(previous: &Value, new: &Value) -> Self {
        let mut edits = Vec::new();
        diff_value(&mut Vec::new(), previous, new, &mut edits);
        Self { edits }
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Anything at, beneath or above `path` differs
    pub fn touches(&self, path: &[&str]) -> bool {
        self.edits.iter().any(|e| e.is_under(path) || e.covers(path))
    }

    /// Keys directly under `section` that differ in any way
    pub fn touched_keys(&self, section: &[&str]) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for edit in &self.edits {
            if edit.path.len() > section.len() && edit.is_under(section) {
                keys.insert(edit.path[section.len()].clone());
            } else if edit.covers(section) {
                let rest = &section[edit.path.len()..];
                let (old, new) = match &edit.op {
                    EditOp::Added(v) => (None, Some(v)),
                    EditOp::Removed(v) => (Some(v), None),
                    EditOp::Changed { from, to } => (Some(from), Some(to)),
                };
                for value in [old, new].into_iter().flatten() {
                    if let Some(Value::Object(map)) = lookup(value, rest) {
                        keys.extend(map.keys().cloned());
                    }
                }
            }
        }
        keys
    }

    /// Keys directly under `section` that were removed
    pub fn removed_keys(&self, section: &[&str]) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for edit in &self.edits {
            if edit.path.len() == section.len() + 1 && edit.is_under(section) {
                if let EditOp::Removed(_) = edit.op {
                    keys.insert(edit.path[section.len()].clone());
                }
            } else if edit.covers(section) {
                let rest = &section[edit.path.len()..];
                let (old, new) = match &edit.op {
                    EditOp::Removed(v) => (lookup(v, rest), None),
                    EditOp::Changed { from, to } => (lookup(from, rest), lookup(to, rest)),
                    EditOp::Added(_) => (None, None),
                };
                if let Some(Value::Object(old)) = old {
                    let remaining = match new {
                        Some(Value::Object(new)) => new.keys().cloned().collect(),
                        _ => BTreeSet::new(),
                    };
                    keys.extend(old.keys().filter(|k| !remaining.contains(*k)).cloned());
                }
            }
        }
        keys
    }

    /// Turn `previous` into `new` in place
    pub fn apply(&self, value: &mut Value) {
        for edit in &self.edits {
            if let EditOp::Changed { to, .. } = &edit.op {
                set_at(value, &edit.path, to.clone());
            }
        }
        // Array tails are removed back to front so indices stay valid
        for edit in self.edits.iter().rev() {
            if let EditOp::Removed(_) = edit.op {
                remove_at(value, &edit.path);
            }
        }
        for edit in &self.edits {
            if let EditOp::Added(added) = &edit.op {
                set_at(value, &edit.path, added.clone());
            }
        }
    }

    /// Turn `new` back into `previous` in place
    pub fn revert(&self, value: &mut Value) {
        for edit in &self.edits {
            if let EditOp::Changed { from, .. } = &edit.op {
                set_at(value, &edit.path, from.clone());
            }
        }
        for edit in self.edits.iter().rev() {
            if let EditOp::Added(_) = edit.op {
                remove_at(value, &edit.path);
            }
        }
        for edit in &self.edits {
            if let EditOp::Removed(removed) = &edit.op {
                set_at(value, &edit.path, removed.clone());
            }
        }
    }
}

fn set_at(root: &mut Value, path: &[String], new: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = new;
        return;
    };
    let Some(parent) = parents.iter().try_fold(root, |v, key| child_mut(v, key)) else {
        return;
    };
    match parent {
        Value::Object(map) => {
            map.insert(last.clone(), new);
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(i) if i < items.len() => items[i] = new,
            Ok(i) if i == items.len() => items.push(new),
            _ => {}
        },
        _ => {}
    }
}

fn remove_at(root: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    match parents.iter().try_fold(root, |v, key| child_mut(v, key)) {
        Some(Value::Object(map)) => {
            map.remove(last);
        }
        Some(Value::Array(items)) => {
            if let Ok(i) = last.parse::<usize>() {
                if i < items.len() {
                    items.remove(i);
                }
            }
        }
        _ => {}
    }
}

fn child_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn diff_value(path: &mut Vec<String>, previous: &Value, new: &Value, edits: &mut Vec<Edit>) {
    match (previous, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                path.push(key.clone());
                match b.get(key) {
                    Some(value) => diff_value(path, old, value, edits),
                    None => edits.push(Edit {
                        path: path.clone(),
                        op: EditOp::Removed(old.clone()),
                    }),
                }
                path.pop();
            }
            for (key, value) in b {
                if !a.contains_key(key) {
                    path.push(key.clone());
                    edits.push(Edit {
                        path: path.clone(),
                        op: EditOp::Added(value.clone()),
                    });
                    path.pop();
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                path.push(i.to_string());
                match (a.get(i), b.get(i)) {
                    (Some(old), Some(value)) => diff_value(path, old, value, edits),
                    (Some(old), None) => edits.push(Edit {
                        path: path.clone(),
                        op: EditOp::Removed(old.clone()),
                    }),
                    (None, Some(value)) => edits.push(Edit {
                        path: path.clone(),
                        op: EditOp::Added(value.clone()),
                    }),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (a, b) if a == b => {}
        (a, b) => edits.push(Edit {
            path: path.clone(),
            op: EditOp::Changed {
                from: a.clone(),
                to: b.clone(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_is_empty() {
        let v = json!({"a": [1, 2, {"b": null}], "c": "d"});
        assert!(StateDiff::compute(&v, &v).is_empty());
    }

    #[test]
    fn test_edit_script() {
        let a = json!({"keep": 1, "gone": true, "list": [1, 2, 3], "obj": {"x": 1}});
        let b = json!({"keep": 1, "new": "n", "list": [1, 5], "obj": {"x": 2}});
        let diff = StateDiff::compute(&a, &b);
        let paths: Vec<String> = diff.edits().iter().map(|e| e.path.join("/")).collect();
        assert_eq!(paths, vec!["gone", "list/1", "list/2", "obj/x", "new"]);
        assert!(matches!(diff.edits()[0].op, EditOp::Removed(_)));
        assert!(matches!(diff.edits()[4].op, EditOp::Added(_)));
    }

    #[test]
    fn test_type_change_is_changed() {
        let diff = StateDiff::compute(&json!({"a": {"b": 1}}), &json!({"a": 3}));
        assert_eq!(diff.len(), 1);
        assert!(matches!(diff.edits()[0].op, EditOp::Changed { .. }));
    }

    #[test]
    fn test_touched_and_removed_keys() {
        let a = json!({"impressions": {"one": {"n": 1}, "two": {"n": 2}, "three": {"n": 3}}});
        let b = json!({"impressions": {"one": {"n": 1}, "two": {"n": 20}, "four": {}}});
        let diff = StateDiff::compute(&a, &b);
        let touched: Vec<_> = diff.touched_keys(&["impressions"]).into_iter().collect();
        assert_eq!(touched, vec!["four", "three", "two"]);
        let removed: Vec<_> = diff.removed_keys(&["impressions"]).into_iter().collect();
        assert_eq!(removed, vec!["three"]);
        assert!(diff.touches(&["impressions", "two", "n"]));
        assert!(!diff.touches(&["impressions", "one"]));
    }

    #[test]
    fn test_apply_and_revert() {
        let a = json!({"keep": 1, "gone": true, "list": [1, 2, 3], "obj": {"x": 1}});
        let b = json!({"keep": 1, "new": "n", "list": [1, 5], "obj": {"x": 2, "y": [true]}});
        let diff = StateDiff::compute(&a, &b);

        let mut value = a.clone();
        diff.apply(&mut value);
        assert_eq!(value, b);
        diff.revert(&mut value);
        assert_eq!(value, a);

        let grow = StateDiff::compute(&b, &a);
        let mut value = b.clone();
        grow.apply(&mut value);
        assert_eq!(value, a);
    }

    #[test]
    fn test_whole_section_edits() {
        let a = json!({"version": "0.2.0", "impressions": {"one": {}, "two": {}}});
        let b = json!({"version": "0.2.0"});
        let diff = StateDiff::compute(&a, &b);
        assert_eq!(diff.removed_keys(&["impressions"]).len(), 2);
        assert_eq!(diff.touched_keys(&["impressions"]).len(), 2);

        let diff = StateDiff::compute(&b, &a);
        assert!(diff.removed_keys(&["impressions"]).is_empty());
        assert_eq!(diff.touched_keys(&["impressions"]).len(), 2);
    }
}
