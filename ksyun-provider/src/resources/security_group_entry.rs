//! Security group entry resource
//!
//! An entry is a single rule of a security group. The same field layout is
//! used for the inline `security_group_entries` of a security group.

use std::collections::HashMap;
use std::sync::Arc;

use ksyun_core::call::{ApiCall, RequestParams};
use ksyun_core::mapping::{FieldRule, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderError, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::ResponseMapper;
use serde_json::Value as Json;

use super::security_group::SECURITY_GROUPS;
use super::{ClientCall, required_str, response_id};
use crate::client::ClientRegistry;

const PORTS: [&str; 2] = ["port_range_from", "port_range_to"];
const ICMP: [&str; 2] = ["icmp_type", "icmp_code"];

/// Fields of one entry, shared with inline security group entries
pub(crate) fn entry_fields() -> Vec<AttributeSchema> {
    vec![
        AttributeSchema::new("cidr_block", types::cidr()).required(),
        AttributeSchema::new("direction", types::one_of(&["in", "out"])).required(),
        AttributeSchema::new("protocol", types::one_of(&["ip", "tcp", "udp", "icmp"])).required(),
        AttributeSchema::new("port_range_from", types::port_number()),
        AttributeSchema::new("port_range_to", types::port_number()),
        AttributeSchema::new("icmp_type", AttributeType::Int),
        AttributeSchema::new("icmp_code", AttributeType::Int),
        AttributeSchema::new("description", AttributeType::String),
    ]
}

fn protocol_rules() -> Vec<FieldRule> {
    let mut rules = Vec::new();
    for protocol in ["tcp", "udp"] {
        let mut rule = FieldRule::when("protocol", protocol);
        for port in PORTS {
            rule = rule.requires(port);
        }
        for icmp in ICMP {
            rule = rule.forbids(icmp);
        }
        rules.push(rule);
    }

    let mut icmp_rule = FieldRule::when("protocol", "icmp");
    for icmp in ICMP {
        icmp_rule = icmp_rule.requires(icmp);
    }
    for port in PORTS {
        icmp_rule = icmp_rule.forbids(port);
    }
    rules.push(icmp_rule);

    let mut ip_rule = FieldRule::when("protocol", "ip");
    for field in PORTS.iter().chain(ICMP.iter()) {
        ip_rule = ip_rule.forbids(*field);
    }
    rules.push(ip_rule);
    rules
}

/// Validated request parameters for one entry
///
/// Attributes outside the entry fields are ignored, so both a standalone
/// entry's state and an inline entry map can be passed.
pub(crate) fn entry_params(entry: &HashMap<String, Value>) -> ProviderResult<RequestParams> {
    let data = ResourceData::planned("security_group_entry", entry.clone());

    let from = data.get("port_range_from").and_then(Value::as_int);
    let to = data.get("port_range_to").and_then(Value::as_int);
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(ProviderError::validation(format!(
            "port_range_from ({}) must not exceed port_range_to ({})",
            from, to
        )));
    }

    let mut schema = ResourceSchema::new("security_group_entry");
    for field in entry_fields() {
        schema = schema.attribute(field);
    }
    let mut mapper = RequestMapper::create(&schema);
    for rule in protocol_rules() {
        mapper = mapper.rule(rule);
    }
    mapper.build(&data)
}

/// Find an entry by ID in a DescribeSecurityGroups item
pub(crate) fn find_entry<'j>(group: &'j Json, entry_id: &str) -> Option<&'j Json> {
    group
        .get("SecurityGroupEntrySet")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("SecurityGroupEntryId").and_then(Json::as_str) == Some(entry_id))
}

pub struct SecurityGroupEntryAdapter {
    clients: Arc<ClientRegistry>,
}

impl SecurityGroupEntryAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for SecurityGroupEntryAdapter {
    fn name(&self) -> &'static str {
        "security_group_entry"
    }

    fn schema(&self) -> ResourceSchema {
        let mut schema = ResourceSchema::new("security_group_entry")
            .attribute(AttributeSchema::new("security_group_id", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("security_group_entry_id", AttributeType::String).read_only(),
            );
        for field in entry_fields() {
            schema = schema.attribute(field);
        }
        // Every field is immutable; a changed entry is revoked and authorized again
        schema.attributes.values_mut().for_each(|attr| attr.force_new = true);
        schema
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let mut params = entry_params(&data.state())?;
        params.insert(
            "SecurityGroupId".to_string(),
            Json::from(required_str(data, "security_group_id")?),
        );

        let authorize = ApiCall::new("AuthorizeSecurityGroupEntry")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "SecurityGroupEntryId")?);
                    Ok(())
                })
            });
        Ok(ApiProcess::new().call(authorize))
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let revoke = ApiCall::new("RevokeSecurityGroupEntry")
            .param("SecurityGroupId", required_str(data, "security_group_id")?)
            .param("SecurityGroupEntryId", data.id())
            .via(&self.clients.vpc())
            .ignore_not_found();
        Ok(ApiProcess::new().call(revoke))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let group_id = required_str(data, "security_group_id")?.to_string();
            let group = SECURITY_GROUPS.fetch(&self.clients.vpc(), &group_id).await?;
            let entry = find_entry(&group, data.id()).ok_or_else(|| {
                ProviderError::not_found(format!(
                    "entry {:?} not found in security group {:?}",
                    data.id(),
                    group_id
                ))
            })?;
            let schema = self.schema();
            ResponseMapper::new(&schema).apply(entry, data)
        })
    }
}
