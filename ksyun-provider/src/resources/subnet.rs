//! Subnet resource

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::case_convert::to_camel_case;
use ksyun_core::mapping::{FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderError, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper};
use log::debug;
use serde_json::Value as Json;

use super::{ClientCall, Lookup, required_str, response_id};
use crate::client::ClientRegistry;
use crate::utils::{normalize_availability_zone, subnet_addresses};

const SUBNETS: Lookup = Lookup {
    action: "DescribeSubnets",
    id_param: "SubnetId.1",
    set: "SubnetSet",
    what: "subnet",
};

/// Attributes filled from the CIDR block when left unset
const AUTO_ADDRESSES: [&str; 3] = ["gateway_ip", "dhcp_ip_from", "dhcp_ip_to"];

pub struct SubnetAdapter {
    clients: Arc<ClientRegistry>,
}

impl SubnetAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for SubnetAdapter {
    fn name(&self) -> &'static str {
        "subnet"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("subnet")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("cidr_block", types::cidr()).required().force_new())
            .attribute(
                AttributeSchema::new("subnet_type", types::one_of(&["Normal", "Reserve", "Physical"]))
                    .with_default(Value::from("Normal"))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("subnet_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("gateway_ip", types::ipv4()).computed().force_new())
            .attribute(AttributeSchema::new("dhcp_ip_from", types::ipv4()).computed().force_new())
            .attribute(AttributeSchema::new("dhcp_ip_to", types::ipv4()).computed().force_new())
            .attribute(AttributeSchema::new("dns1", types::ipv4()).computed())
            .attribute(AttributeSchema::new("dns2", types::ipv4()).computed())
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .computed()
                    .force_new()
                    .with_provider_name("AvailabilityZone"),
            )
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let mut params = RequestMapper::create(&schema)
            .transform(
                "availability_zone",
                FieldTransform::direct().value_fn(|zone| {
                    zone.as_str()
                        .map(|z| Value::from(normalize_availability_zone(z)))
                }),
            )
            .build(data)?;

        let reserve = data.get_str("subnet_type") == Some("Reserve");
        if !reserve {
            let cidr = required_str(data, "cidr_block")?;
            let missing: Vec<&str> = AUTO_ADDRESSES
                .iter()
                .copied()
                .filter(|name| data.get_str(name).is_none_or(str::is_empty))
                .collect();

            if !missing.is_empty() {
                let Some(addresses) = subnet_addresses(cidr) else {
                    return Err(ProviderError::validation(format!(
                        "{} must be set, {} is too small to derive them",
                        missing.join(", "),
                        cidr
                    )));
                };
                for name in missing {
                    let ip = match name {
                        "gateway_ip" => addresses.gateway_ip,
                        "dhcp_ip_from" => addresses.dhcp_ip_from,
                        _ => addresses.dhcp_ip_to,
                    };
                    debug!("subnet {}: {} defaults to {}", cidr, name, ip);
                    params.insert(to_camel_case(name), Json::from(ip.to_string()));
                }
            }
        }

        let create = ApiCall::new("CreateSubnet")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "SubnetId")?);
                    Ok(())
                })
            });
        Ok(ApiProcess::new().call(create))
    }

    fn update_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let mut params = RequestMapper::update(&schema).build(data)?;

        let mut process = ApiProcess::new();
        if !params.is_empty() {
            params.insert("SubnetId".to_string(), Json::from(data.id()));
            process.push(
                ApiCall::new("ModifySubnet")
                    .with_params(params)
                    .via(&self.clients.vpc()),
            );
        }
        Ok(process)
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        Ok(ApiProcess::new().call(SUBNETS.delete_call(
            &self.clients.vpc(),
            "DeleteSubnet",
            "SubnetId",
            data.id(),
        )))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = SUBNETS.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("SubnetId", FieldResponse::ignore())
                .entry("AvailabilityZoneName", FieldResponse::to("availability_zone"))
                .apply(&item, data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing;
    use crate::transport::ScriptedTransport;
    use ksyun_core::provider::{create_with, update_with};
    use serde_json::json;
    use std::collections::HashMap;

    fn subnet(cidr: &str) -> ResourceData {
        ResourceData::new("subnet")
            .with_attribute("vpc_id", "vpc-1")
            .with_attribute("cidr_block", cidr)
            .with_attribute("subnet_name", "app")
    }

    #[test]
    fn derives_gateway_and_dhcp_range() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = SubnetAdapter::new(testing::registry(&transport));

        let process = adapter.create_process(&subnet("10.0.1.0/24")).unwrap();
        let calls = process.describe();
        let params = &calls[0].params;
        assert_eq!(params.get("GatewayIp"), Some(&json!("10.0.1.1")));
        assert_eq!(params.get("DhcpIpFrom"), Some(&json!("10.0.1.2")));
        assert_eq!(params.get("DhcpIpTo"), Some(&json!("10.0.1.254")));
        assert_eq!(params.get("SubnetType"), Some(&json!("Normal")));
    }

    #[test]
    fn keeps_user_supplied_addresses() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = SubnetAdapter::new(testing::registry(&transport));
        let data = subnet("10.0.1.0/24")
            .with_attribute("gateway_ip", "10.0.1.254")
            .with_attribute("dhcp_ip_to", "10.0.1.100")
            .with_attribute("availability_zone", "cn_beijing_6a");

        let process = adapter.create_process(&data).unwrap();
        let calls = process.describe();
        let params = &calls[0].params;
        assert_eq!(params.get("GatewayIp"), Some(&json!("10.0.1.254")));
        assert_eq!(params.get("DhcpIpFrom"), Some(&json!("10.0.1.2")));
        assert_eq!(params.get("DhcpIpTo"), Some(&json!("10.0.1.100")));
        assert_eq!(params.get("AvailabilityZone"), Some(&json!("cn-beijing-6a")));
    }

    #[test]
    fn reserve_subnet_skips_auto_match() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = SubnetAdapter::new(testing::registry(&transport));
        let data = subnet("10.0.1.0/31").with_attribute("subnet_type", "Reserve");

        let process = adapter.create_process(&data).unwrap();
        let calls = process.describe();
        assert!(!calls[0].params.contains_key("GatewayIp"));
    }

    #[tokio::test]
    async fn tiny_block_fails_before_any_call() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = SubnetAdapter::new(testing::registry(&transport));

        let mut data = subnet("10.0.1.0/31");
        let err = create_with(&adapter, &mut data).await.unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("gateway_ip, dhcp_ip_from, dhcp_ip_to must be set"));
        assert!(transport.actions().is_empty());
        assert!(data.is_gone());
    }

    #[tokio::test]
    async fn create_reads_back_zone() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("CreateSubnet", json!({"SubnetId": "subnet-1"}))
            .always(
                "DescribeSubnets",
                json!({"SubnetSet": [{
                    "SubnetId": "subnet-1",
                    "VpcId": "vpc-1",
                    "SubnetName": "app",
                    "CidrBlock": "10.0.1.0/24",
                    "SubnetType": "Normal",
                    "GatewayIp": "10.0.1.1",
                    "DhcpIpFrom": "10.0.1.2",
                    "DhcpIpTo": "10.0.1.254",
                    "Dns1": "198.18.254.41",
                    "AvailabilityZoneName": "cn-beijing-6a",
                    "CreateTime": "2026-01-01 00:00:00"
                }]}),
            );
        let adapter = SubnetAdapter::new(testing::registry(&transport));

        let mut data = subnet("10.0.1.0/24");
        create_with(&adapter, &mut data).await.unwrap();

        assert_eq!(data.id(), "subnet-1");
        assert_eq!(data.get_str("availability_zone"), Some("cn-beijing-6a"));
        assert_eq!(data.get_str("dns1"), Some("198.18.254.41"));
        assert_eq!(transport.actions(), vec!["CreateSubnet", "DescribeSubnets"]);
    }

    #[tokio::test]
    async fn update_modifies_dns_only() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("ModifySubnet", json!({"Return": true}))
            .always("DescribeSubnets", json!({"SubnetSet": [{"SubnetId": "subnet-1"}]}));
        let adapter = SubnetAdapter::new(testing::registry(&transport));

        let prior = HashMap::from([
            ("vpc_id".to_string(), Value::from("vpc-1")),
            ("cidr_block".to_string(), Value::from("10.0.1.0/24")),
            ("dns1".to_string(), Value::from("8.8.8.8")),
        ]);
        let mut planned = prior.clone();
        planned.insert("dns1".to_string(), Value::from("1.1.1.1"));
        let mut data = ResourceData::new("subnet")
            .with_id("subnet-1")
            .with_prior(prior)
            .with_planned(planned);

        update_with(&adapter, &mut data).await.unwrap();

        let requests = transport.requests_for("ModifySubnet");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].params.len(), 2);
        assert_eq!(requests[0].param_str("Dns1"), Some("1.1.1.1"));
        assert_eq!(requests[0].param_str("SubnetId"), Some("subnet-1"));
    }
}
