//! Unmarshal - Write API responses back into resource attributes
//!
//! Response fields are matched to attributes through, in order, the entry
//! table, the schema's provider-side names and the snake_case form of the
//! field name. Values are coerced to the schema type since the Ksyun APIs
//! return numbers and booleans as strings in places.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde_json::Value as Json;

use crate::case_convert::to_snake_case;
use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{ResourceData, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Per-response-field entry of a response table
#[derive(Debug, Clone, Default)]
pub struct FieldResponse {
    /// Target attribute
    pub field: Option<String>,
    /// Replaces the default coercion
    pub extract: Option<fn(&Json) -> Option<Value>>,
    /// Keep the previous value when the field is missing from a response
    pub keep_auto: bool,
    pub ignore: bool,
}

impl FieldResponse {
    pub fn to(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn ignore() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    pub fn extract(mut self, f: fn(&Json) -> Option<Value>) -> Self {
        self.extract = Some(f);
        self
    }

    pub fn keep_auto(mut self) -> Self {
        self.keep_auto = true;
        self
    }
}

/// Maps one response object onto a resource's attributes
#[derive(Debug, Clone)]
pub struct ResponseMapper<'s> {
    schema: &'s ResourceSchema,
    entries: HashMap<String, FieldResponse>,
}

impl<'s> ResponseMapper<'s> {
    pub fn new(schema: &'s ResourceSchema) -> Self {
        Self {
            schema,
            entries: HashMap::new(),
        }
    }

    /// Register an entry for the response field `key`
    pub fn entry(mut self, key: impl Into<String>, entry: FieldResponse) -> Self {
        self.entries.insert(key.into(), entry);
        self
    }

    fn target(&self, key: &str) -> Option<&'s AttributeSchema> {
        if let Some(field) = self.entries.get(key).and_then(|e| e.field.as_deref()) {
            return self.schema.get(field);
        }
        self.schema
            .sorted()
            .into_iter()
            .find(|attr| attr.provider_name.as_deref() == Some(key))
            .or_else(|| self.schema.get(&to_snake_case(key)))
    }

    fn keeps(&self, attribute: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.keep_auto && e.field.as_deref() == Some(attribute))
    }

    /// Write the fields of `response` into `data`
    ///
    /// Computed-only attributes missing from the response are cleared unless
    /// a KeepAuto entry targets them. Other attributes are left untouched.
    pub fn apply(&self, response: &Json, data: &mut ResourceData) -> ProviderResult<()> {
        let Json::Object(fields) = response else {
            return Err(ProviderError::new(format!(
                "expected an object for {}, got {}",
                self.schema.resource_type, response
            )));
        };

        let mut touched = HashSet::new();
        for (key, raw) in fields {
            let entry = self.entries.get(key);
            if entry.is_some_and(|e| e.ignore) {
                continue;
            }
            let Some(attr) = self.target(key) else {
                debug!("no attribute for response field {}", key);
                continue;
            };

            let value = match entry.and_then(|e| e.extract) {
                Some(extract) => extract(raw),
                None => coerce(raw, &attr.attr_type),
            };
            match value {
                Some(v) => data.set(attr.name.clone(), v),
                None if raw.is_null() => data.clear(attr.name.clone()),
                None => {
                    warn!("cannot read {} as {} for {}", raw, attr.attr_type, attr.name);
                    continue;
                }
            }
            touched.insert(attr.name.as_str());
        }

        for attr in self.schema.sorted() {
            if attr.read_only && !touched.contains(attr.name.as_str()) && !self.keeps(&attr.name) {
                data.clear(attr.name.clone());
            }
        }
        Ok(())
    }
}

/// Convert a response value to an attribute value of the given type
pub fn coerce(raw: &Json, attr_type: &AttributeType) -> Option<Value> {
    match (attr_type.base(), raw) {
        (_, Json::Null) => None,

        (AttributeType::String | AttributeType::Enum(_), Json::String(s)) => {
            Some(Value::String(s.clone()))
        }
        (AttributeType::String | AttributeType::Enum(_), Json::Number(n)) => {
            Some(Value::String(n.to_string()))
        }
        (AttributeType::String | AttributeType::Enum(_), Json::Bool(b)) => {
            Some(Value::String(b.to_string()))
        }

        (AttributeType::Int, Json::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_number))
            .map(Value::Int),
        (AttributeType::Int, Json::String(s)) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse().ok().and_then(whole_number))
                .map(Value::Int)
        }

        (AttributeType::Float, Json::Number(n)) => n.as_f64().map(Value::Float),
        (AttributeType::Float, Json::String(s)) => s.trim().parse().ok().map(Value::Float),

        (AttributeType::Bool, Json::Bool(b)) => Some(Value::Bool(*b)),
        (AttributeType::Bool, Json::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (AttributeType::Bool, Json::Number(n)) => n.as_i64().map(|i| Value::Bool(i != 0)),

        (AttributeType::List(inner) | AttributeType::Set(inner), Json::Array(items)) => Some(
            Value::List(items.iter().filter_map(|item| coerce(item, inner)).collect()),
        ),
        (AttributeType::List(inner) | AttributeType::Set(inner), scalar) => {
            coerce(scalar, inner).map(|v| Value::List(vec![v]))
        }

        (AttributeType::Map(inner), Json::Object(object)) => Some(Value::Map(
            object
                .iter()
                .filter_map(|(k, v)| coerce(v, inner).map(|v| (k.clone(), v)))
                .collect(),
        )),

        (AttributeType::Struct(fields), Json::Object(object)) => {
            let mut map = HashMap::new();
            for (key, v) in object {
                let snake = to_snake_case(key);
                let field = fields
                    .iter()
                    .find(|f| f.provider_name.as_deref() == Some(key.as_str()))
                    .or_else(|| fields.iter().find(|f| f.name == snake));
                if let Some(field) = field
                    && let Some(value) = coerce(v, &field.attr_type)
                {
                    map.insert(field.name.clone(), value);
                }
            }
            Some(Value::Map(map))
        }

        _ => None,
    }
}

/// `f` as an integer when it has no fractional part and fits in an i64
fn whole_number(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Value at a dotted path; numeric segments index arrays from 0
///
/// `lookup(&resp, "VpcSet.0.VpcId")`
pub fn lookup<'j>(json: &'j Json, path: &str) -> Option<&'j Json> {
    path.split('.').try_fold(json, |current, segment| match current {
        Json::Object(object) => object.get(segment),
        Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
