//! Mapping - Build API request parameters from declarative attributes
//!
//! Attributes are snake_case and nested; request parameters are PascalCase
//! with dots separating nested fields and 1-based list indexes:
//!
//! ```text
//! subnet_ids = ["a", "b"]     -> SubnetIds.1=a, SubnetIds.2=b
//! entry = [{ protocol: "ip" }] -> Entry.1.Protocol=ip
//! vpc_id (Filter)             -> vpc-id.1=...
//! vpc_id (FilterGroup)        -> Filter.1.Name=vpc-id, Filter.1.Value.1=...
//! ```
//!
//! A [`RequestMapper`] never mutates the data it reads. The same schema,
//! data and table always produce the same map.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde_json::Value as Json;

use crate::call::RequestParams;
use crate::case_convert::{to_camel_case, to_filter_key};
use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{ResourceData, Value};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// How one attribute is laid out in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// `Name=value`; lists still expand to `Name.N`
    Direct,
    /// `Name.N=value`, even for a single value
    WithN,
    /// `key-name.N=value`
    Filter,
    /// `Filter.N.Name=key-name`, `Filter.N.Value.M=value`
    FilterGroup,
    /// Never sent
    Ignore,
}

/// Per-attribute entry of a transform table
#[derive(Debug, Clone)]
pub struct FieldTransform {
    pub kind: TransformKind,
    /// Parameter (or filter key) name override
    pub name: Option<String>,
    /// Replaces the attribute value; `None` drops the attribute
    pub value_fn: Option<fn(&Value) -> Option<Value>>,
    /// Only send when the value is non-empty
    pub non_empty: bool,
    /// Send on update even when unchanged
    pub force_update: bool,
}

impl FieldTransform {
    fn of(kind: TransformKind) -> Self {
        Self {
            kind,
            name: None,
            value_fn: None,
            non_empty: false,
            force_update: false,
        }
    }

    pub fn direct() -> Self {
        Self::of(TransformKind::Direct)
    }

    pub fn with_n() -> Self {
        Self::of(TransformKind::WithN)
    }

    pub fn filter() -> Self {
        Self::of(TransformKind::Filter)
    }

    pub fn filter_group() -> Self {
        Self::of(TransformKind::FilterGroup)
    }

    pub fn ignore() -> Self {
        Self::of(TransformKind::Ignore)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value_fn(mut self, f: fn(&Value) -> Option<Value>) -> Self {
        self.value_fn = Some(f);
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    pub fn force_update(mut self) -> Self {
        self.force_update = true;
        self
    }
}

/// Cross-field constraint checked before a request is built
///
/// `FieldRule::when("route_type", "Tunnel").requires("tunnel_id")`
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub attribute: String,
    pub equals: Value,
    pub requires: Vec<String>,
    pub forbids: Vec<String>,
}

impl FieldRule {
    pub fn when(attribute: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            equals: equals.into(),
            requires: Vec::new(),
            forbids: Vec::new(),
        }
    }

    pub fn requires(mut self, field: impl Into<String>) -> Self {
        self.requires.push(field.into());
        self
    }

    pub fn forbids(mut self, field: impl Into<String>) -> Self {
        self.forbids.push(field.into());
        self
    }

    fn check(&self, data: &ResourceData) -> ProviderResult<()> {
        if data.get(&self.attribute) != Some(&self.equals) {
            return Ok(());
        }
        let shown = match &self.equals {
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        };
        for field in &self.requires {
            if data.get(field).is_none_or(Value::is_empty) {
                return Err(ProviderError::validation(format!(
                    "{} is required when {} is {}",
                    field, self.attribute, shown
                )));
            }
        }
        for field in &self.forbids {
            if data.get(field).is_some() {
                return Err(ProviderError::validation(format!(
                    "{} must not be set when {} is {}",
                    field, self.attribute, shown
                )));
            }
        }
        Ok(())
    }
}

/// Full request (create) or sparse request (update)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    Create,
    Update,
}

/// Builds request parameters from a schema and a transform table
#[derive(Debug, Clone)]
pub struct RequestMapper<'s> {
    schema: &'s ResourceSchema,
    mode: MappingMode,
    transforms: HashMap<String, FieldTransform>,
    rules: Vec<FieldRule>,
    only_transforms: bool,
}

impl<'s> RequestMapper<'s> {
    pub fn new(schema: &'s ResourceSchema, mode: MappingMode) -> Self {
        Self {
            schema,
            mode,
            transforms: HashMap::new(),
            rules: Vec::new(),
            only_transforms: false,
        }
    }

    pub fn create(schema: &'s ResourceSchema) -> Self {
        Self::new(schema, MappingMode::Create)
    }

    pub fn update(schema: &'s ResourceSchema) -> Self {
        Self::new(schema, MappingMode::Update)
    }

    pub fn transform(mut self, attribute: impl Into<String>, transform: FieldTransform) -> Self {
        self.transforms.insert(attribute.into(), transform);
        self
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Only map attributes that have a transform entry
    pub fn only_transforms(mut self) -> Self {
        self.only_transforms = true;
        self
    }

    pub fn build(&self, data: &ResourceData) -> ProviderResult<RequestParams> {
        for rule in &self.rules {
            rule.check(data)?;
        }

        let mut params = RequestParams::new();
        let mut filter_index = 0;
        let direct = FieldTransform::direct();

        for attr in self.schema.sorted() {
            let transform = match self.transforms.get(&attr.name) {
                Some(t) => t,
                None if self.only_transforms => continue,
                None => &direct,
            };
            if attr.read_only || transform.kind == TransformKind::Ignore {
                continue;
            }

            let Some(value) = self.value_of(attr, transform, data)? else {
                continue;
            };
            let value = match transform.value_fn {
                Some(f) => match f(&value) {
                    Some(v) => v,
                    None => continue,
                },
                None => value,
            };
            if transform.non_empty && value.is_empty() {
                continue;
            }

            match transform.kind {
                TransformKind::Direct => {
                    expand(&param_name(attr, transform), &attr.attr_type, &value, &mut params);
                }
                TransformKind::WithN => {
                    let name = param_name(attr, transform);
                    match &value {
                        Value::List(_) => expand(&name, &attr.attr_type, &value, &mut params),
                        scalar => {
                            params.insert(format!("{}.1", name), scalar.to_json());
                        }
                    }
                }
                TransformKind::Filter => {
                    let key = filter_key(attr, transform);
                    for (i, item) in items_of(&value).iter().enumerate() {
                        params.insert(format!("{}.{}", key, i + 1), item.to_json());
                    }
                }
                TransformKind::FilterGroup => {
                    filter_index += 1;
                    params.insert(
                        format!("Filter.{}.Name", filter_index),
                        Json::String(filter_key(attr, transform)),
                    );
                    for (i, item) in items_of(&value).iter().enumerate() {
                        params.insert(
                            format!("Filter.{}.Value.{}", filter_index, i + 1),
                            item.to_json(),
                        );
                    }
                }
                TransformKind::Ignore => {}
            }
        }

        debug!(
            "mapped {} parameter(s) for {} ({:?})",
            params.len(),
            self.schema.resource_type,
            self.mode
        );
        Ok(params)
    }

    fn value_of(
        &self,
        attr: &AttributeSchema,
        transform: &FieldTransform,
        data: &ResourceData,
    ) -> ProviderResult<Option<Value>> {
        match self.mode {
            MappingMode::Create => Ok(data.get(&attr.name).or(attr.default.as_ref()).cloned()),
            MappingMode::Update => {
                if attr.force_new {
                    return Ok(None);
                }
                if transform.force_update {
                    return Ok(data.get(&attr.name).cloned());
                }
                if !attr.has_change(data) {
                    return Ok(None);
                }
                match data.get_planned(&attr.name) {
                    Some(planned) => Ok(Some(planned.clone())),
                    None => cleared(attr).map(Some),
                }
            }
        }
    }
}

/// Value that unsets an attribute removed from the plan
///
/// Only strings have an empty form the APIs accept; removing anything else
/// needs an explicit value.
fn cleared(attr: &AttributeSchema) -> ProviderResult<Value> {
    match attr.attr_type.base() {
        AttributeType::String => Ok(Value::String(String::new())),
        _ => Err(ProviderError::validation(format!(
            "{} cannot be removed once set, give it an explicit value instead",
            attr.name
        ))),
    }
}

fn param_name(attr: &AttributeSchema, transform: &FieldTransform) -> String {
    transform
        .name
        .clone()
        .or_else(|| attr.provider_name.clone())
        .unwrap_or_else(|| to_camel_case(&attr.name))
}

fn filter_key(attr: &AttributeSchema, transform: &FieldTransform) -> String {
    transform
        .name
        .clone()
        .unwrap_or_else(|| to_filter_key(&attr.name))
}

fn items_of(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn field_name(field: &AttributeSchema) -> String {
    field
        .provider_name
        .clone()
        .unwrap_or_else(|| to_camel_case(&field.name))
}

/// Flatten one value under `prefix` following its schema type
fn expand(prefix: &str, attr_type: &AttributeType, value: &Value, out: &mut RequestParams) {
    match (attr_type.base(), value) {
        (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                expand(&format!("{}.{}", prefix, i + 1), inner, item, out);
            }
        }
        (AttributeType::Struct(fields), Value::Map(map)) => {
            let mut fields: Vec<_> = fields.iter().collect();
            fields.sort_by(|a, b| a.name.cmp(&b.name));
            for field in fields {
                if field.read_only {
                    continue;
                }
                if let Some(v) = map.get(&field.name) {
                    expand(
                        &format!("{}.{}", prefix, field_name(field)),
                        &field.attr_type,
                        v,
                        out,
                    );
                }
            }
        }
        (AttributeType::Map(inner), Value::Map(map)) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                expand(&format!("{}.{}", prefix, key), inner, &map[key], out);
            }
        }
        (_, Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                out.insert(format!("{}.{}", prefix, i + 1), item.to_json());
            }
        }
        (_, scalar) => {
            out.insert(prefix.to_string(), scalar.to_json());
        }
    }
}

/// Read `Name.N` (or `key-name.N`) parameters back into a list
///
/// Entries with nested fields (`Name.N.Field`) come back as objects keyed by
/// the remaining path. Items are returned in index order.
pub fn collect_indexed(params: &RequestParams, prefix: &str) -> Vec<Json> {
    let mut items: BTreeMap<usize, Json> = BTreeMap::new();
    let head = format!("{}.", prefix);

    for (key, value) in params {
        let Some(rest) = key.strip_prefix(&head) else {
            continue;
        };
        let (index, field) = match rest.split_once('.') {
            Some((index, field)) => (index, Some(field)),
            None => (rest, None),
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        match field {
            None => {
                items.insert(index, value.clone());
            }
            Some(field) => {
                let entry = items
                    .entry(index)
                    .or_insert_with(|| Json::Object(serde_json::Map::new()));
                if let Json::Object(object) = entry {
                    object.insert(field.to_string(), value.clone());
                }
            }
        }
    }

    items.into_values().collect()
}

/// Read a `Filter.N.Name` / `Filter.N.Value.M` block back into key -> values
pub fn collect_filters(params: &RequestParams) -> BTreeMap<String, Vec<Json>> {
    let mut filters = BTreeMap::new();
    for group in collect_indexed(params, "Filter") {
        let Some(name) = group.get("Name").and_then(Json::as_str) else {
            continue;
        };
        let mut values: Vec<(usize, Json)> = group
            .as_object()
            .into_iter()
            .flatten()
            .filter_map(|(k, v)| {
                let index = k.strip_prefix("Value.")?.parse::<usize>().ok()?;
                Some((index, v.clone()))
            })
            .collect();
        values.sort_by_key(|(i, _)| *i);
        filters.insert(
            name.to_string(),
            values.into_iter().map(|(_, v)| v).collect(),
        );
    }
    filters
}
