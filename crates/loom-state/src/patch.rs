// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path-based patch language and structural differ.
//!
//! The patch language is deliberately minimal: `set`, `insert`, and `delete`
//! are sufficient to express any deep mutation a draft recipe makes, and the
//! differ emits each forward operation paired with the inverse that undoes
//! it.  The round-trip invariant is
//! `apply(apply(s, forward), inverse) == s`, with the inverse list applied
//! in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step into the value tree: a map key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array index.
    Index(usize),
    /// Map key.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A path from the state root into the value tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    /// The empty path, addressing the state root.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Extend this path with a map key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    /// Extend this path with an array index.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// Whether this path addresses the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent path and the final segment.
    ///
    /// Returns `None` for the root path.
    #[must_use]
    pub fn split_last(&self) -> Option<(&[PathSegment], &PathSegment)> {
        self.0.split_last().map(|(last, init)| (init, last))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.0 {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors applying a patch to a value tree.
#[derive(Debug, Error)]
pub enum PatchError {
    /// An intermediate path segment did not resolve.
    #[error("path {path} does not resolve: {reason}")]
    Unresolvable {
        /// The offending path.
        path: Path,
        /// What went wrong.
        reason: String,
    },
    /// An insert index was past the end of the target array.
    #[error("insert index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        /// The array path.
        path: Path,
        /// Requested index.
        index: usize,
        /// Current array length.
        len: usize,
    },
}

// ---------------------------------------------------------------------------
// Patch operations
// ---------------------------------------------------------------------------

/// A single structural edit to the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Write `value` at `path`, creating the final map key if absent.
    Set {
        /// Target location.
        path: Path,
        /// Value to write.
        value: Value,
    },
    /// Insert `value` into the array at `path` before `index`.
    Insert {
        /// Path of the target array.
        path: Path,
        /// Insertion index (`0..=len`).
        index: usize,
        /// Value to insert.
        value: Value,
    },
    /// Remove the map key or array element at `path`.
    Delete {
        /// Target location.
        path: Path,
    },
}

/// Forward patches together with the inverse list that undoes them.
///
/// `inverse` is applied in order (the differ already emits it reversed).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatchSet {
    /// Operations that transform the old state into the new state.
    pub forward: Vec<PatchOp>,
    /// Operations that transform the new state back into the old state.
    pub inverse: Vec<PatchOp>,
}

impl PatchSet {
    /// Whether the diff found no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// A patch set with forward and inverse swapped.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            forward: self.inverse.clone(),
            inverse: self.forward.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

fn resolve_mut<'a>(root: &'a mut Value, segments: &[PathSegment], full: &Path) -> Result<&'a mut Value, PatchError> {
    let mut cur = root;
    for seg in segments {
        cur = match (seg, cur) {
            (PathSegment::Key(k), Value::Object(map)) => {
                map.get_mut(k).ok_or_else(|| PatchError::Unresolvable {
                    path: full.clone(),
                    reason: format!("missing key '{k}'"),
                })?
            }
            (PathSegment::Index(i), Value::Array(arr)) => {
                let len = arr.len();
                arr.get_mut(*i).ok_or_else(|| PatchError::Unresolvable {
                    path: full.clone(),
                    reason: format!("index {i} out of bounds (len {len})"),
                })?
            }
            (seg, other) => {
                return Err(PatchError::Unresolvable {
                    path: full.clone(),
                    reason: format!("segment '{seg}' does not match a {}", type_name(other)),
                });
            }
        };
    }
    Ok(cur)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Apply a single patch operation to `state` in place.
pub fn apply(state: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Set { path, value } => match path.split_last() {
            None => {
                *state = value.clone();
                Ok(())
            }
            Some((parent, PathSegment::Key(k))) => {
                let target = resolve_mut(state, parent, path)?;
                match target {
                    Value::Object(map) => {
                        map.insert(k.clone(), value.clone());
                        Ok(())
                    }
                    other => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("cannot set key in a {}", type_name(other)),
                    }),
                }
            }
            Some((parent, PathSegment::Index(i))) => {
                let target = resolve_mut(state, parent, path)?;
                match target {
                    Value::Array(arr) if *i < arr.len() => {
                        arr[*i] = value.clone();
                        Ok(())
                    }
                    Value::Array(arr) => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("index {i} out of bounds (len {})", arr.len()),
                    }),
                    other => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("cannot index a {}", type_name(other)),
                    }),
                }
            }
        },
        PatchOp::Insert { path, index, value } => {
            let target = resolve_mut(state, &path.0, path)?;
            match target {
                Value::Array(arr) => {
                    if *index > arr.len() {
                        return Err(PatchError::IndexOutOfBounds {
                            path: path.clone(),
                            index: *index,
                            len: arr.len(),
                        });
                    }
                    arr.insert(*index, value.clone());
                    Ok(())
                }
                other => Err(PatchError::Unresolvable {
                    path: path.clone(),
                    reason: format!("cannot insert into a {}", type_name(other)),
                }),
            }
        }
        PatchOp::Delete { path } => match path.split_last() {
            None => Err(PatchError::Unresolvable {
                path: path.clone(),
                reason: "cannot delete the root".into(),
            }),
            Some((parent, PathSegment::Key(k))) => {
                let target = resolve_mut(state, parent, path)?;
                match target {
                    Value::Object(map) => {
                        map.remove(k).ok_or_else(|| PatchError::Unresolvable {
                            path: path.clone(),
                            reason: format!("missing key '{k}'"),
                        })?;
                        Ok(())
                    }
                    other => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("cannot delete key from a {}", type_name(other)),
                    }),
                }
            }
            Some((parent, PathSegment::Index(i))) => {
                let target = resolve_mut(state, parent, path)?;
                match target {
                    Value::Array(arr) if *i < arr.len() => {
                        arr.remove(*i);
                        Ok(())
                    }
                    Value::Array(arr) => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("index {i} out of bounds (len {})", arr.len()),
                    }),
                    other => Err(PatchError::Unresolvable {
                        path: path.clone(),
                        reason: format!("cannot index a {}", type_name(other)),
                    }),
                }
            }
        },
    }
}

/// Apply a list of patch operations in order.
pub fn apply_all(state: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    for op in ops {
        apply(state, op)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compute the structural difference between `old` and `new`.
///
/// The returned forward list transforms `old` into `new`; the inverse list
/// transforms `new` back into `old` when applied in order.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> PatchSet {
    let mut forward = Vec::new();
    let mut inverse = Vec::new();
    diff_into(old, new, &Path::root(), &mut forward, &mut inverse);
    // Inverses were collected in forward order; undoing must run backwards.
    inverse.reverse();
    PatchSet { forward, inverse }
}

fn diff_into(old: &Value, new: &Value, path: &Path, fwd: &mut Vec<PatchOp>, inv: &mut Vec<PatchOp>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            for (k, old_val) in o {
                let child = path.clone().key(k.clone());
                match n.get(k) {
                    Some(new_val) => diff_into(old_val, new_val, &child, fwd, inv),
                    None => {
                        fwd.push(PatchOp::Delete { path: child.clone() });
                        inv.push(PatchOp::Set {
                            path: child,
                            value: old_val.clone(),
                        });
                    }
                }
            }
            for (k, new_val) in n {
                if !o.contains_key(k) {
                    let child = path.clone().key(k.clone());
                    fwd.push(PatchOp::Set {
                        path: child.clone(),
                        value: new_val.clone(),
                    });
                    inv.push(PatchOp::Delete { path: child });
                }
            }
        }
        (Value::Array(o), Value::Array(n)) => {
            let common = o.len().min(n.len());
            for i in 0..common {
                let child = path.clone().index(i);
                diff_into(&o[i], &n[i], &child, fwd, inv);
            }
            if n.len() > o.len() {
                for (i, new_val) in n.iter().enumerate().skip(o.len()) {
                    fwd.push(PatchOp::Insert {
                        path: path.clone(),
                        index: i,
                        value: new_val.clone(),
                    });
                    inv.push(PatchOp::Delete {
                        path: path.clone().index(i),
                    });
                }
            } else if o.len() > n.len() {
                // Delete from the tail downwards so indices stay valid.
                for i in (n.len()..o.len()).rev() {
                    fwd.push(PatchOp::Delete {
                        path: path.clone().index(i),
                    });
                    inv.push(PatchOp::Insert {
                        path: path.clone(),
                        index: i,
                        value: o[i].clone(),
                    });
                }
            }
        }
        _ => {
            fwd.push(PatchOp::Set {
                path: path.clone(),
                value: new.clone(),
            });
            inv.push(PatchOp::Set {
                path: path.clone(),
                value: old.clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(old: Value, new: Value) {
        let set = diff(&old, &new);
        let mut s = old.clone();
        apply_all(&mut s, &set.forward).unwrap();
        assert_eq!(s, new, "forward patches must produce the new state");
        apply_all(&mut s, &set.inverse).unwrap();
        assert_eq!(s, old, "inverse patches must restore the old state");
    }

    #[test]
    fn identical_values_produce_empty_diff() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        assert!(diff(&v, &v).is_empty());
    }

    #[test]
    fn scalar_change_is_a_single_set() {
        let set = diff(&json!({"a": 1}), &json!({"a": 2}));
        assert_eq!(set.forward.len(), 1);
        match &set.forward[0] {
            PatchOp::Set { path, value } => {
                assert_eq!(path.to_string(), "/a");
                assert_eq!(value, &json!(2));
            }
            other => panic!("expected Set, got {other:?}"),
        }
        roundtrip(json!({"a": 1}), json!({"a": 2}));
    }

    #[test]
    fn added_key_roundtrips() {
        roundtrip(json!({"balance": 1000}), json!({"balance": 1000, "reserved": 100}));
    }

    #[test]
    fn removed_key_roundtrips() {
        roundtrip(json!({"a": 1, "b": 2}), json!({"a": 1}));
    }

    #[test]
    fn nested_object_change_roundtrips() {
        roundtrip(
            json!({"user": {"name": "ada", "tags": {"vip": true}}}),
            json!({"user": {"name": "ada", "tags": {"vip": false, "beta": true}}}),
        );
    }

    #[test]
    fn array_append_roundtrips() {
        roundtrip(json!({"xs": [1, 2]}), json!({"xs": [1, 2, 3, 4]}));
    }

    #[test]
    fn array_truncate_roundtrips() {
        roundtrip(json!({"xs": [1, 2, 3, 4]}), json!({"xs": [1]}));
    }

    #[test]
    fn array_element_change_roundtrips() {
        roundtrip(json!({"xs": [1, 2, 3]}), json!({"xs": [1, 9, 3]}));
    }

    #[test]
    fn type_change_roundtrips() {
        roundtrip(json!({"a": [1, 2]}), json!({"a": {"k": "v"}}));
    }

    #[test]
    fn root_replacement_roundtrips() {
        roundtrip(json!(1), json!({"now": "object"}));
    }

    #[test]
    fn insert_past_end_is_rejected() {
        let mut v = json!({"xs": [1]});
        let err = apply(
            &mut v,
            &PatchOp::Insert {
                path: Path::root().key("xs"),
                index: 5,
                value: json!(0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::IndexOutOfBounds { index: 5, .. }));
    }

    #[test]
    fn delete_root_is_rejected() {
        let mut v = json!({});
        let err = apply(&mut v, &PatchOp::Delete { path: Path::root() }).unwrap_err();
        assert!(matches!(err, PatchError::Unresolvable { .. }));
    }

    #[test]
    fn delete_missing_key_is_rejected() {
        let mut v = json!({"a": 1});
        let err = apply(&mut v, &PatchOp::Delete { path: Path::root().key("b") }).unwrap_err();
        assert!(matches!(err, PatchError::Unresolvable { .. }));
    }

    #[test]
    fn path_display_is_slash_separated() {
        assert_eq!(Path::root().to_string(), "/");
        assert_eq!(Path::root().key("a").index(3).key("b").to_string(), "/a/3/b");
    }

    #[test]
    fn ops_serialize_with_op_tag() {
        let op = PatchOp::Set {
            path: Path::root().key("a"),
            value: json!(1),
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["op"], "set");
        assert_eq!(v["path"], json!(["a"]));
    }

    #[test]
    fn inverted_swaps_directions() {
        let set = diff(&json!({"a": 1}), &json!({"a": 2}));
        let inv = set.inverted();
        assert_eq!(inv.forward, set.inverse);
        assert_eq!(inv.inverse, set.forward);
    }
}
