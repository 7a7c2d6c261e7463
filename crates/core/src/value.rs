//! Dynamic configuration values.
//!
//! `Value` is the tagged union every user configuration, dynamic field and decoded
//! manifest is expressed in. Maps are `BTreeMap`s so iteration (and therefore
//! serialization) order is stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> Self { Value::Map(BTreeMap::new()) }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Short name of the variant, used in type mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self { Value::Map(m) => Some(m), _ => None }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self { Value::Map(m) => Some(m), _ => None }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self { Value::List(l) => Some(l), _ => None }
    }

    /// Map lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Follow a dotted path of map keys, e.g. `metadata.name`.
    pub fn pointer(&self, dotted: &str) -> Option<&Value> {
        dotted.split('.').try_fold(self, |cur, key| cur.get(key))
    }

    /// Insert into a map value, returning the previous entry. No-op on non-maps.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.as_map_mut().and_then(|m| m.insert(key.into(), value.into()))
    }

    /// Number of nodes in the tree, stopping early once `max` is reached.
    pub fn node_count(&self, max: usize) -> usize {
        fn walk(v: &Value, cur: &mut usize, max: usize) {
            if *cur >= max { return; }
            *cur += 1;
            match v {
                Value::List(items) => {
                    for item in items {
                        if *cur >= max { break; }
                        walk(item, cur, max);
                    }
                }
                Value::Map(map) => {
                    for item in map.values() {
                        if *cur >= max { break; }
                        walk(item, cur, max);
                    }
                }
                _ => {}
            }
        }
        let mut count = 0usize;
        walk(self, &mut count, max);
        count
    }

    /// Numeric-aware equality: `Int(1)` equals `Float(1.0)`.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{:?}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self { Value::Map(v) }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
