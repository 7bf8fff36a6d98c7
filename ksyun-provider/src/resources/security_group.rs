//! Security group resource
//!
//! Inline `security_group_entries` are authorized one call at a time after the
//! group exists. On update, entries are compared without their server-side
//! IDs: removed ones are revoked by ID, added ones authorized.

use std::collections::HashMap;
use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::{FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderError, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper};
use log::warn;
use serde_json::{Value as Json, json};

use super::security_group_entry::{entry_fields, entry_params};
use super::{ClientCall, Lookup, response_id};
use crate::client::{ClientRegistry, ServiceClient};

pub(crate) const SECURITY_GROUPS: Lookup = Lookup {
    action: "DescribeSecurityGroups",
    id_param: "SecurityGroupId.1",
    set: "SecurityGroupSet",
    what: "security group",
};

const ENTRY_ID: &str = "security_group_entry_id";

fn entries(value: Option<&Value>) -> Vec<HashMap<String, Value>> {
    value
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.as_map().cloned())
        .collect()
}

/// Entry without its server-side ID
fn rule_of(entry: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut rule = entry.clone();
    rule.remove(ENTRY_ID);
    rule
}

/// Fill in the group ID once the group exists
fn in_group(call: ApiCall) -> ApiCall {
    call.on_before(|call, data| {
        Box::pin(async move {
            if data.is_gone() {
                return Err(ProviderError::new(format!(
                    "{} needs a security group ID",
                    call.action
                )));
            }
            call.params
                .insert("SecurityGroupId".to_string(), json!(data.id()));
            Ok(true)
        })
    })
}

fn authorize(client: &Arc<ServiceClient>, entry: &HashMap<String, Value>) -> ProviderResult<ApiCall> {
    let params = entry_params(entry)?;
    Ok(in_group(ApiCall::new("AuthorizeSecurityGroupEntry").with_params(params)).via(client))
}

pub struct SecurityGroupAdapter {
    clients: Arc<ClientRegistry>,
}

impl SecurityGroupAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for SecurityGroupAdapter {
    fn name(&self) -> &'static str {
        "security_group"
    }

    fn schema(&self) -> ResourceSchema {
        let mut fields = entry_fields();
        fields.push(AttributeSchema::new(ENTRY_ID, AttributeType::String).read_only());

        ResourceSchema::new("security_group")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("security_group_name", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "security_group_entries",
                    AttributeType::set(AttributeType::Struct(fields)),
                )
                .computed(),
            )
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let params = RequestMapper::create(&schema)
            .transform("security_group_entries", FieldTransform::ignore())
            .build(data)?;

        let vpc = self.clients.vpc();
        let create = ApiCall::new("CreateSecurityGroup")
            .with_params(params)
            .via(&vpc)
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "SecurityGroupId")?);
                    Ok(())
                })
            });

        let mut process = ApiProcess::new().call(create);
        for entry in entries(data.get("security_group_entries")) {
            process.push(authorize(&vpc, &entry)?);
        }
        Ok(process)
    }

    fn update_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let vpc = self.clients.vpc();
        let mut process = ApiProcess::new();

        let mut params = RequestMapper::update(&schema)
            .transform("security_group_entries", FieldTransform::ignore())
            .build(data)?;
        if !params.is_empty() {
            params.insert("SecurityGroupId".to_string(), Json::from(data.id()));
            process.push(
                ApiCall::new("ModifySecurityGroup")
                    .with_params(params)
                    .via(&vpc),
            );
        }

        if schema.has_change(data, "security_group_entries") {
            let old = entries(data.get_prior("security_group_entries"));
            let new = entries(data.get_planned("security_group_entries"));
            let old_rules: Vec<_> = old.iter().map(rule_of).collect();
            let new_rules: Vec<_> = new.iter().map(rule_of).collect();

            for (entry, rule) in old.iter().zip(&old_rules) {
                if new_rules.contains(rule) {
                    continue;
                }
                let Some(entry_id) = entry.get(ENTRY_ID).and_then(Value::as_str) else {
                    warn!("security group {}: removed entry has no ID, skipping", data.id());
                    continue;
                };
                process.push(
                    ApiCall::new("RevokeSecurityGroupEntry")
                        .param("SecurityGroupId", data.id())
                        .param("SecurityGroupEntryId", entry_id)
                        .via(&vpc)
                        .ignore_not_found(),
                );
            }
            for rule in &new_rules {
                if !old_rules.contains(rule) {
                    process.push(authorize(&vpc, rule)?);
                }
            }
        }
        Ok(process)
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        Ok(ApiProcess::new().call(SECURITY_GROUPS.delete_call(
            &self.clients.vpc(),
            "DeleteSecurityGroup",
            "SecurityGroupId",
            data.id(),
        )))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = SECURITY_GROUPS.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("SecurityGroupId", FieldResponse::ignore())
                .entry(
                    "SecurityGroupEntrySet",
                    FieldResponse::to("security_group_entries"),
                )
                .apply(&item, data)
        })
    }
}
