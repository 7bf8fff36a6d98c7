//! Tag helpers shared by taggable resources
//!
//! Tags live in the tag service, not in the resource's own API. Creating or
//! updating a taggable resource appends a tag sync group that runs with
//! `continue_on_error`, so one rejected tag does not hide the others.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::{FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{ProviderError, ProviderResult};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::{Value as Json, json};

use super::ClientCall;
use crate::client::ServiceClient;

/// Flatten a `TagSet` of `{TagKey, TagValue}` pairs into a map
pub fn tag_set_to_map(raw: &Json) -> Option<Value> {
    let map = raw
        .as_array()?
        .iter()
        .filter_map(|tag| {
            let key = tag.get("TagKey")?.as_str()?;
            let value = tag.get("TagValue").and_then(Json::as_str).unwrap_or_default();
            Some((key.to_string(), Value::from(value)))
        })
        .collect();
    Some(Value::Map(map))
}

fn tag_map(value: Option<&Value>) -> HashMap<String, String> {
    value
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Fill in the resource ID once the resource exists
fn with_resource_id(call: ApiCall) -> ApiCall {
    call.on_before(|call, data| {
        Box::pin(async move {
            if data.is_gone() {
                return Err(ProviderError::new(format!(
                    "{} needs a resource ID",
                    call.action
                )));
            }
            call.params
                .insert("ResourceIds.1".to_string(), json!(data.id()));
            Ok(true)
        })
    })
}

/// Calls bringing the remote tags from the prior to the planned map
///
/// One CreateTags call per added or changed key, one DeleteTags call per
/// removed key, in key order.
pub fn sync_process(
    client: &Arc<ServiceClient>,
    resource_type: &'static str,
    data: &ResourceData,
) -> ApiProcess {
    let old = tag_map(data.get_prior("tags"));
    let new = tag_map(data.get_planned("tags"));
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    let mut process = ApiProcess::new().continue_on_error();
    for key in keys {
        let call = match (old.get(key), new.get(key)) {
            (before, Some(value)) if before != Some(value) => ApiCall::new("CreateTags")
                .param("ResourceType", resource_type)
                .param("Tag.1.Key", key.as_str())
                .param("Tag.1.Value", value.as_str()),
            (Some(_), None) => ApiCall::new("DeleteTags")
                .param("ResourceType", resource_type)
                .param("TagKeys.1", key.as_str()),
            _ => continue,
        };
        process.push(with_resource_id(call).via(client));
    }
    process
}

fn filter_schema() -> ResourceSchema {
    ResourceSchema::new("tag_filter")
        .attribute(AttributeSchema::new(
            "resource_id",
            AttributeType::list(AttributeType::String),
        ))
        .attribute(AttributeSchema::new("resource_type", AttributeType::String))
}

/// Current tags of one resource
pub async fn read(
    client: &ServiceClient,
    resource_type: &str,
    id: &str,
) -> ProviderResult<Value> {
    let schema = filter_schema();
    let filter = ResourceData::new("tag_filter")
        .with_attribute("resource_id", Value::List(vec![Value::from(id)]))
        .with_attribute("resource_type", resource_type);
    let params = RequestMapper::create(&schema)
        .transform("resource_id", FieldTransform::filter_group())
        .transform("resource_type", FieldTransform::filter_group())
        .build(&filter)?;

    let response = client.call("DescribeTags", &params).await?;
    Ok(response
        .get("TagSet")
        .and_then(tag_set_to_map)
        .unwrap_or_else(|| Value::Map(HashMap::new())))
}
