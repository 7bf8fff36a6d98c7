//! Resource - Attribute values and the tracked data of one resource instance

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Whether the value carries nothing worth sending
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => false,
        }
    }

    /// Convert to the JSON form used in request parameters
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Tracked data of one resource instance during an operation
///
/// Three layers are kept: the `prior` attributes persisted by the host after
/// the last operation, the `planned` attributes the host wants, and the
/// attributes `written` by the provider during this operation. Reads see
/// written over planned over prior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    pub resource_type: String,
    id: String,
    prior: HashMap<String, Value>,
    planned: HashMap<String, Value>,
    written: HashMap<String, Option<Value>>,
}

impl ResourceData {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Data for a resource about to be created
    pub fn planned(resource_type: impl Into<String>, planned: HashMap<String, Value>) -> Self {
        Self::new(resource_type).with_planned(planned)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_prior(mut self, prior: HashMap<String, Value>) -> Self {
        self.prior = prior;
        self
    }

    pub fn with_planned(mut self, planned: HashMap<String, Value>) -> Self {
        self.planned = planned;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.planned.insert(key.into(), value.into());
        self
    }

    /// Opaque identifier assigned by the cloud, empty when the resource is gone
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn is_gone(&self) -> bool {
        self.id.is_empty()
    }

    /// Current value of an attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.written.get(key) {
            Some(written) => written.as_ref(),
            None => self.planned.get(key).or_else(|| self.prior.get(key)),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Previously persisted value of an attribute
    pub fn get_prior(&self, key: &str) -> Option<&Value> {
        self.prior.get(key)
    }

    /// Planned value, falling back to the prior one when nothing is planned
    pub fn get_planned(&self, key: &str) -> Option<&Value> {
        if self.planned.is_empty() {
            self.prior.get(key)
        } else {
            self.planned.get(key)
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.written.insert(key.into(), Some(value));
    }

    pub fn clear(&mut self, key: impl Into<String>) {
        self.written.insert(key.into(), None);
    }

    /// Final attribute set: prior, then planned, then written values
    pub fn state(&self) -> HashMap<String, Value> {
        let mut state = if self.planned.is_empty() {
            self.prior.clone()
        } else {
            self.planned.clone()
        };
        for (key, value) in &self.written {
            match value {
                Some(v) => {
                    state.insert(key.clone(), v.clone());
                }
                None => {
                    state.remove(key);
                }
            }
        }
        state
    }

    /// Turn the final state into the prior state of the next operation
    pub fn commit(&mut self) {
        self.prior = self.state();
        self.planned.clear();
        self.written.clear();
    }
}
