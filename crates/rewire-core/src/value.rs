//! Values stored in and read from state nodes.
//!
//! `List` and `Map` are plain containers: storing one into a node wraps it
//! into a child [`State`], so reading it back yields `Value::Node`. Snapshots
//! produced by [`deep_clone`](crate::deep_clone) go the other way.

use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::{Scope, State};
use crate::key::Key;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(Vec<Value>),
    Map(Props),
    Node(State),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Node(_) => true,
        }
    }

    /// Containers, plain or live.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Node(_))
    }

    /// `Map`, or a node wrapping a mapping.
    pub fn is_mapping(&self) -> bool {
        match self {
            Value::Map(_) => true,
            Value::Node(n) => !n.is_list(),
            _ => false,
        }
    }

    /// `List`, or a node wrapping a sequence.
    pub fn is_sequence(&self) -> bool {
        match self {
            Value::List(_) => true,
            Value::Node(n) => n.is_list(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&State> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<State> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Props> {
        match self {
            Value::Map(props) => Some(props),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
        }
    }

    /// JSON view of the value. Nodes are snapshotted, `Undefined` and
    /// non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(props) => Json::Object(
                props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Node(n) => n.snapshot().to_json(),
        }
    }
}

fn as_exact_int(n: f64) -> Option<i64> {
    // 2^53: beyond this f64 no longer holds every integer.
    (n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0).then_some(n as i64)
}

fn number_to_json(n: f64) -> serde_json::Value {
    match as_exact_int(n) {
        Some(i) => serde_json::Value::from(i),
        None => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Identity comparison: scalars by value, nodes by pointer, plain
/// containers element-wise.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(props) => f
                .debug_map()
                .entries(props.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Node(n) => write!(f, "{n:?}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => s.serialize_unit(),
            Value::Bool(b) => s.serialize_bool(*b),
            Value::Number(n) if !n.is_finite() => s.serialize_unit(),
            Value::Number(n) => match as_exact_int(*n) {
                Some(i) => s.serialize_i64(i),
                None => s.serialize_f64(*n),
            },
            Value::String(v) => s.serialize_str(v),
            Value::List(items) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(props) => {
                let mut map = s.serialize_map(Some(props.len()))?;
                for (k, v) in props.iter() {
                    map.serialize_entry(&**k, v)?;
                }
                map.end()
            }
            Value::Node(n) => n.snapshot().serialize(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}
number_from!(f64, f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Props> for Value {
    fn from(props: Props) -> Self {
        Value::Map(props)
    }
}

impl From<State> for Value {
    fn from(n: State) -> Self {
        Value::Node(n)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Undefined, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

/// Insertion-ordered property map backing mappings.
#[derive(Clone, Default, PartialEq)]
pub struct Props(Vec<(Rc<str>, Value)>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| &**k == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.0[i].1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replaces in place when the name exists, appends otherwise.
    pub fn insert(&mut self, name: impl Into<Rc<str>>, value: Value) -> Option<Value> {
        let name = name.into();
        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.0[i].1, value)),
            None => {
                self.0.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|i| self.0.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.0.iter().map(|(k, _)| k)
    }
}

impl<K: Into<Rc<str>>, V: Into<Value>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Props::new();
        for (k, v) in iter {
            props.insert(k, v.into());
        }
        props
    }
}

impl IntoIterator for Props {
    type Item = (Rc<str>, Value);
    type IntoIter = std::vec::IntoIter<(Rc<str>, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A computed property: evaluated under a capture scope, re-evaluated when
/// anything it read through that scope changes.
#[derive(Clone)]
pub struct Computed(Rc<dyn Fn(&Scope, &State, &Key) -> Value>);

impl Computed {
    pub fn new(f: impl Fn(&Scope, &State, &Key) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub(crate) fn eval(&self, scope: &Scope, node: &State, key: &Key) -> Value {
        (self.0)(scope, node, key)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computed(..)")
    }
}

pub fn computed(f: impl Fn(&Scope, &State, &Key) -> Value + 'static) -> Computed {
    Computed::new(f)
}

/// Right-hand side of [`State::set`].
#[derive(Clone, Debug)]
pub enum Assign {
    Value(Value),
    Computed(Computed),
}

impl From<Computed> for Assign {
    fn from(c: Computed) -> Self {
        Assign::Computed(c)
    }
}

macro_rules! assign_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Assign {
            fn from(v: $t) -> Self {
                Assign::Value(Value::from(v))
            }
        })*
    };
}
assign_from!(
    Value, bool, f64, f32, i32, i64, u32, u64, usize, &str, String, Vec<Value>, Props, State,
    serde_json::Value
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_script_rules() {
        for falsy in [
            Value::Undefined,
            Value::Null,
            Value::from(false),
            Value::from(0),
            Value::Number(f64::NAN),
            Value::from(""),
        ] {
            assert!(!falsy.is_truthy(), "{falsy:?}");
        }
        assert!(Value::from(-1).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::List(vec![]).is_truthy());
    }

    #[test]
    fn nan_is_never_identical() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(Value::from(0.0), Value::from(-0.0));
    }

    #[test]
    fn json_conversion_keeps_order_and_integers() {
        let v = Value::from(json!({"b": 1, "a": [true, null, 2.5]}));
        let keys: Vec<_> = v.as_map().unwrap().keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(v.to_json(), json!({"b": 1, "a": [true, null, 2.5]}));
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"b":1,"a":[true,null,2.5]}"#);
    }

    #[test]
    fn props_insert_replaces_in_place() {
        let mut p: Props = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(p.insert("a", Value::from(3)), Some(Value::from(1)));
        assert_eq!(p.keys().map(|k| &**k).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(p.remove("b"), Some(Value::from(2)));
        assert_eq!(p.len(), 1);
    }
}
