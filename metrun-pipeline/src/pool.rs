//! Variable pool
//!
//! The evolving key/value state threaded through a pipeline run. Seeded from
//! user input and updated by each step's declared outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Returns whether a variable value counts as set
///
/// Empty strings, `0`, `false` (any case) and the `None` marker are unset.
pub fn is_truthy(value: &str) -> bool {
    !(value.is_empty()
        || value == "0"
        || value == metrun_core::protocol::NONE_MARKER
        || value.eq_ignore_ascii_case("false"))
}

/// Flattens a JSON scalar from a pipeline source into a variable value
///
/// `null` becomes the empty string so that it reads as unset.
pub fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Mapping from variable name to value; last writer wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariablePool {
    vars: HashMap<String, String>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value of `key` if present and truthy
    pub fn truthy(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| is_truthy(v))
    }

    pub fn is_truthy(&self, key: &str) -> bool {
        self.truthy(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overwrites entries with everything in `other`
    pub fn merge(&mut self, other: VariablePool) {
        self.vars.extend(other.vars);
    }

    /// Copy of this pool with `overrides` written on top
    pub fn overlaid(&self, overrides: &BTreeMap<String, String>) -> VariablePool {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.set(key.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariablePool {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut pool = VariablePool::new();
        for (key, value) in iter {
            pool.set(key, value);
        }
        pool
    }
}
