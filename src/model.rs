use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub type NodeId = u32;
pub type EdgeId = u32;

pub const NULL_NODE_ID: NodeId = 0;
pub const NULL_EDGE_ID: EdgeId = 0;

/// A typed property value as it exists on the wire.
///
/// `Uint` is reserved for internal fields; the write API rejects it in
/// user-supplied maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Char(char),
    Text(String),
}

impl PropertyValue {
    /// Equality as the query layer sees it: two values are equal only if
    /// they carry the same type tag and identical canonical bytes. Floats
    /// compare by bit pattern, so NaN matches NaN and -0.0 does not match
    /// 0.0. Cross-type comparisons are always false.
    pub fn wire_eq(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Uint(a), PropertyValue::Uint(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Char(a), PropertyValue::Char(b)) => a == b,
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering within one type tag, for range filters. Values of
    /// different types are unordered.
    pub fn partial_cmp_value(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.partial_cmp(b),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.partial_cmp(b),
            (PropertyValue::Uint(a), PropertyValue::Uint(b)) => a.partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.partial_cmp(b),
            (PropertyValue::Char(a), PropertyValue::Char(b)) => a.partial_cmp(b),
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PropertyValue::Uint(_))
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<char> for PropertyValue {
    fn from(v: char) -> Self {
        PropertyValue::Char(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

/// An insertion-ordered key/value map. The on-disk form is an ordered
/// sequence of pairs, so ordering is part of the data, not an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pair. An existing key keeps its position and gets the new
    /// value; the previous value is returned.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        let value = value.into();
        for (k, v) in &mut self.entries {
            if *k == key {
                return Some(std::mem::replace(v, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// True when every pair of `query` is present here with a wire-equal
    /// value. The superset test behind all property-predicate scans.
    pub fn contains_all(&self, query: &PropertyMap) -> bool {
        query
            .iter()
            .all(|(k, qv)| self.get(k).is_some_and(|v| v.wire_eq(qv)))
    }
}

impl<K: Into<String>, V: Into<PropertyValue>, const N: usize> From<[(K, V); N]> for PropertyMap {
    fn from(pairs: [(K, V); N]) -> Self {
        let mut map = PropertyMap::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        map
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, PropertyValue);
    type IntoIter = std::vec::IntoIter<(String, PropertyValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub props: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub props: PropertyMap,
}

/// An edge with its endpoint node records optionally inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeWithEndpoints {
    pub edge: Edge,
    pub from_node: Option<Node>,
    pub to_node: Option<Node>,
}
