//! Deep clone, structural diff, and reactive patch.

use serde::Serialize;

use crate::{Key, Props, State, StateError, Value};

/// Plain copy: nodes and containers become `List`/`Map` all the way down.
pub fn deep_clone(value: &Value) -> Value {
    match value {
        Value::Node(node) => {
            let entries = node.entries();
            if node.is_list() {
                Value::List(entries.iter().map(|(_, v)| deep_clone(v)).collect())
            } else {
                Value::Map(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), deep_clone(v)))
                        .collect(),
                )
            }
        }
        Value::List(items) => Value::List(items.iter().map(deep_clone).collect()),
        Value::Map(props) => Value::Map(props.iter().map(|(k, v)| (k.clone(), deep_clone(v))).collect()),
        scalar => scalar.clone(),
    }
}

/// Difference between two snapshots, from `previous` to `current`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Diff {
    Added { value: Value },
    Removed { value: Value },
    Changed { from: Value, to: Value },
    /// Both sides are containers of the same kind; per-key differences.
    Nested { entries: Vec<(Key, Diff)> },
}

impl Diff {
    /// The diff that takes `current` back to `previous`.
    pub fn invert(&self) -> Diff {
        match self {
            Diff::Added { value } => Diff::Removed {
                value: value.clone(),
            },
            Diff::Removed { value } => Diff::Added {
                value: value.clone(),
            },
            Diff::Changed { from, to } => Diff::Changed {
                from: to.clone(),
                to: from.clone(),
            },
            Diff::Nested { entries } => Diff::Nested {
                entries: entries.iter().map(|(k, d)| (k.clone(), d.invert())).collect(),
            },
        }
    }

    /// Number of leaf differences.
    pub fn len(&self) -> usize {
        match self {
            Diff::Nested { entries } => entries.iter().map(|(_, d)| d.len()).sum(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Diff> {
        let key = key.into();
        match self {
            Diff::Nested { entries } => entries.iter().find(|(k, _)| *k == key).map(|(_, d)| d),
            _ => None,
        }
    }
}

fn same_scalar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

/// Structural difference between `current` and `previous`; `None` when they
/// are equal. Live nodes are compared through their snapshots.
pub fn deep_diff(current: &Value, previous: &Value) -> Option<Diff> {
    match (current, previous) {
        (Value::Node(_), _) | (_, Value::Node(_)) => deep_diff(&deep_clone(current), &deep_clone(previous)),
        (Value::Map(a), Value::Map(b)) => nested(diff_props(a, b)),
        (Value::List(a), Value::List(b)) => {
            let len = a.len().max(b.len());
            let entries = (0..len)
                .filter_map(|i| {
                    let cur = a.get(i).unwrap_or(&Value::Undefined);
                    let prev = b.get(i).unwrap_or(&Value::Undefined);
                    deep_diff(cur, prev).map(|d| (Key::Index(i), d))
                })
                .collect();
            nested(entries)
        }
        (Value::Undefined, Value::Undefined) => None,
        (value, Value::Undefined) => Some(Diff::Added {
            value: value.clone(),
        }),
        (Value::Undefined, value) => Some(Diff::Removed {
            value: value.clone(),
        }),
        (a, b) if same_scalar(a, b) => None,
        (a, b) => Some(Diff::Changed {
            from: b.clone(),
            to: a.clone(),
        }),
    }
}

fn diff_props(current: &Props, previous: &Props) -> Vec<(Key, Diff)> {
    let mut entries: Vec<(Key, Diff)> = current
        .iter()
        .filter_map(|(k, v)| {
            let prev = previous.get(k).unwrap_or(&Value::Undefined);
            deep_diff(v, prev).map(|d| (Key::Name(k.clone()), d))
        })
        .collect();
    entries.extend(
        previous
            .iter()
            .filter(|(k, _)| !current.contains_key(k))
            .filter_map(|(k, v)| deep_diff(&Value::Undefined, v).map(|d| (Key::Name(k.clone()), d))),
    );
    entries
}

fn nested(entries: Vec<(Key, Diff)>) -> Option<Diff> {
    (!entries.is_empty()).then_some(Diff::Nested { entries })
}

/// Applies `patch` onto a live node through [`State::set`], so every
/// affected listener fires.
///
/// Mappings merge: keys absent from the patch are kept, `Undefined` values
/// delete. A container value lands on an existing child node of the same kind
/// by recursion; anything else is assigned unless the stored value is already
/// identical, so echoing a snapshot back leaves computed bindings alone. A list
/// patch on a sequence deletes the surplus elements from the end before it
/// writes the resulting `length`.
pub fn deep_patch(target: &State, patch: &Value) -> Result<(), StateError> {
    match patch {
        Value::Map(props) => {
            for (k, v) in props.iter() {
                patch_entry(target, Key::Name(k.clone()), v)?;
            }
        }
        Value::List(items) => {
            for (i, v) in items.iter().enumerate() {
                patch_entry(target, Key::Index(i), v)?;
            }
            if target.is_list() {
                for i in (items.len()..target.len()).rev() {
                    target.delete(i)?;
                }
                target.set(Key::length(), items.len())?;
            }
        }
        Value::Node(node) => deep_patch(target, &node.snapshot())?,
        _ => log::debug!("ignoring scalar patch {patch:?}"),
    }
    Ok(())
}

fn patch_entry(target: &State, key: Key, value: &Value) -> Result<(), StateError> {
    match value {
        Value::Undefined => target.delete(key),
        v if v.is_object() => match target.get(key.clone()) {
            Value::Node(child) if child.is_list() == v.is_sequence() => deep_patch(&child, v),
            _ => target.set(key, v.clone()),
        },
        scalar if target.get(key.clone()) == *scalar => Ok(()),
        scalar => target.set(key, scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::computed;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn clone_detaches_from_live_nodes() {
        let node = State::from_json(json!({"a": {"b": [1, 2]}})).unwrap();
        let snap = node.snapshot();
        assert!(matches!(snap, Value::Map(_)));
        node.get("a").into_node().unwrap().set("b", 0).unwrap();
        assert_eq!(snap.to_json(), json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn equal_snapshots_have_no_diff() {
        let a = v(json!({"x": [1, {"y": null}], "n": 1.5}));
        assert_eq!(deep_diff(&a, &a.clone()), None);
        assert_eq!(deep_diff(&Value::Number(f64::NAN), &Value::Number(f64::NAN)), None);
    }

    #[test]
    fn describes_additions_removals_and_changes_at_depth() {
        let prev = v(json!({"keep": 1, "gone": true, "deep": {"n": 1, "list": [1, 2]}}));
        let cur = v(json!({"keep": 1, "deep": {"n": 2, "list": [1]}, "new": "x"}));
        let diff = deep_diff(&cur, &prev).unwrap();

        assert_eq!(diff.get("keep"), None);
        assert_eq!(diff.get("gone"), Some(&Diff::Removed { value: Value::from(true) }));
        assert_eq!(diff.get("new"), Some(&Diff::Added { value: Value::from("x") }));
        let deep = diff.get("deep").unwrap();
        assert_eq!(
            deep.get("n"),
            Some(&Diff::Changed { from: Value::from(1), to: Value::from(2) })
        );
        assert_eq!(
            deep.get("list").and_then(|l| l.get(1)),
            Some(&Diff::Removed { value: Value::from(2) })
        );
        assert_eq!(diff.len(), 4);
    }

    #[test]
    fn first_snapshot_is_an_addition() {
        let cur = v(json!({"a": 1}));
        assert_eq!(deep_diff(&cur, &Value::Undefined), Some(Diff::Added { value: cur.clone() }));
    }

    #[test]
    fn invert_swaps_direction() {
        let a = v(json!({"x": 1, "y": 2}));
        let b = v(json!({"x": 3, "z": 4}));
        let forward = deep_diff(&a, &b).unwrap();
        let backward = deep_diff(&b, &a).unwrap();
        let sorted = |d: Diff| match d {
            Diff::Nested { mut entries } => {
                entries.sort_by_key(|(k, _)| k.to_string());
                entries
            }
            _ => unreachable!(),
        };
        assert_eq!(sorted(forward.invert()), sorted(backward));
    }

    #[test]
    fn diff_serializes_with_op_tags() {
        let diff = deep_diff(&v(json!({"a": 2})), &v(json!({"a": 1}))).unwrap();
        assert_eq!(
            serde_json::to_value(&diff).unwrap(),
            json!({"op": "nested", "entries": [["a", {"op": "changed", "from": 1, "to": 2}]]})
        );
    }

    #[test]
    fn patch_writes_through_listeners_and_merges() {
        let node = State::from_json(json!({"a": 1, "keep": true, "child": {"x": 1, "y": 1}})).unwrap();
        let child = node.get("child").into_node().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        node.on(crate::Channel::AnyProperty, move |c| s.borrow_mut().push(c.path.clone()));

        deep_patch(&node, &v(json!({"a": 99, "child": {"y": 2}}))).unwrap();
        assert_eq!(node.to_json(), json!({"a": 99, "keep": true, "child": {"x": 1, "y": 2}}));
        // The child node is patched in place, not replaced.
        assert!(node.get("child").into_node().unwrap().ptr_eq(&child));
        assert_eq!(
            *seen.borrow(),
            vec![vec![Key::name("a")], vec![Key::name("child"), Key::name("y")]]
        );
    }

    #[test]
    fn patch_resizes_sequences_and_deletes_undefined() {
        let node = State::from_json(json!({"list": [1, 2, 3], "tmp": 1})).unwrap();
        let mut props = Props::new();
        props.insert("list", v(json!([1, 5])));
        props.insert("tmp", Value::Undefined);
        deep_patch(&node, &Value::Map(props)).unwrap();
        assert_eq!(node.to_json(), json!({"list": [1, 5]}));
    }

    #[test]
    fn patch_replaces_mismatched_kinds() {
        let node = State::from_json(json!({"a": [1], "b": 1})).unwrap();
        deep_patch(&node, &v(json!({"a": {"k": 1}, "b": {"k": 2}}))).unwrap();
        assert_eq!(node.to_json(), json!({"a": {"k": 1}, "b": {"k": 2}}));
    }

    #[test]
    fn echoed_patch_keeps_computed_bindings_alive() {
        let node = State::from_json(json!({"a": 1})).unwrap();
        node.set(
            "b",
            computed(|scope, n, _| Value::from(n.read(scope, "a").as_f64().unwrap_or_default() * 2.0)),
        )
        .unwrap();

        deep_patch(&node, &node.snapshot()).unwrap();
        assert_eq!(node.listener_count("a"), 1);
        node.set("a", 5).unwrap();
        assert_eq!(node.get("b"), Value::from(10));

        // A different value is still an ordinary assignment.
        deep_patch(&node, &v(json!({"b": 0}))).unwrap();
        assert_eq!(node.listener_count("a"), 0);
        node.set("a", 6).unwrap();
        assert_eq!(node.get("b"), Value::from(0));
    }

    #[test]
    fn shrinking_patch_reaches_derived_sequences() {
        let node = State::from_json(json!({"list": [1, 2, 3]})).unwrap();
        node.set(
            "doubled",
            computed(|scope, n, _| {
                let list = n.get("list").into_node().unwrap_or_else(State::list);
                Value::List(list.each(scope, |item, _, _| {
                    Value::from(item.as_f64().unwrap_or_default() * 2.0)
                }))
            }),
        )
        .unwrap();

        deep_patch(&node, &v(json!({"list": [1, 2]}))).unwrap();
        assert_eq!(node.get("list").to_json(), json!([1, 2]));
        assert_eq!(node.get("doubled").to_json(), json!([2, 4]));

        deep_patch(&node, &v(json!({"list": []}))).unwrap();
        assert_eq!(node.get("doubled").to_json(), json!([]));
    }
}
