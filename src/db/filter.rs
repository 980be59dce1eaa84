use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, PropertyValue};

/// A richer scan predicate than the plain superset query: exact matches,
/// forbidden keys, and per-key range bounds. Bounds only match values of
/// the same type; a missing key fails every bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyFilter {
    equal: PropertyMap,
    absent: Vec<String>,
    below: PropertyMap,
    at_most: PropertyMap,
    above: PropertyMap,
    at_least: PropertyMap,
}

impl PropertyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to hold exactly `value`.
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.equal.insert(key, value);
        self
    }

    /// Requires `key` to be absent.
    pub fn without(mut self, key: impl Into<String>) -> Self {
        self.absent.push(key.into());
        self
    }

    /// Requires `key` to hold a value strictly below `bound`.
    pub fn below(mut self, key: impl Into<String>, bound: impl Into<PropertyValue>) -> Self {
        self.below.insert(key, bound);
        self
    }

    /// Requires `key` to hold a value not exceeding `bound`.
    pub fn at_most(mut self, key: impl Into<String>, bound: impl Into<PropertyValue>) -> Self {
        self.at_most.insert(key, bound);
        self
    }

    /// Requires `key` to hold a value strictly above `bound`.
    pub fn above(mut self, key: impl Into<String>, bound: impl Into<PropertyValue>) -> Self {
        self.above.insert(key, bound);
        self
    }

    /// Requires `key` to hold a value of at least `bound`.
    pub fn at_least(mut self, key: impl Into<String>, bound: impl Into<PropertyValue>) -> Self {
        self.at_least.insert(key, bound);
        self
    }

    pub fn matches(&self, props: &PropertyMap) -> bool {
        if !props.contains_all(&self.equal) {
            return false;
        }
        if self.absent.iter().any(|key| props.contains_key(key)) {
            return false;
        }
        bounds_hold(props, &self.below, &[Ordering::Less])
            && bounds_hold(props, &self.at_most, &[Ordering::Less, Ordering::Equal])
            && bounds_hold(props, &self.above, &[Ordering::Greater])
            && bounds_hold(props, &self.at_least, &[Ordering::Greater, Ordering::Equal])
    }
}

fn bounds_hold(props: &PropertyMap, bounds: &PropertyMap, accept: &[Ordering]) -> bool {
    bounds.iter().all(|(key, bound)| {
        props
            .get(key)
            .and_then(|value| value.partial_cmp_value(bound))
            .is_some_and(|ordering| accept.contains(&ordering))
    })
}
