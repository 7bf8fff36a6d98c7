//! VPN gateway resource

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::RequestMapper;
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper};
use serde_json::Value as Json;

use super::{ClientCall, Lookup, response_id};
use crate::client::ClientRegistry;

const VPN_GATEWAYS: Lookup = Lookup {
    action: "DescribeVpnGateways",
    id_param: "VpnGatewayId.1",
    set: "VpnGatewaySet",
    what: "vpn gateway",
};

pub struct VpnGatewayAdapter {
    clients: Arc<ClientRegistry>,
}

impl VpnGatewayAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for VpnGatewayAdapter {
    fn name(&self) -> &'static str {
        "vpn_gateway"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpn_gateway")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("vpn_gateway_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("band_width", types::positive_int()).required())
            .attribute(AttributeSchema::new("charge_type", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("purchase_time", AttributeType::Int).force_new())
            .attribute(
                AttributeSchema::new("vpn_gateway_version", types::one_of(&["1.0", "2.0"]))
                    .with_default(Value::from("1.0"))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("project_id", AttributeType::String).computed().force_new())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let params = RequestMapper::create(&schema).build(data)?;

        let create = ApiCall::new("CreateVpnGateway")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "VpnGatewayId")?);
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
            params.insert("VpnGatewayId".to_string(), Json::from(data.id()));
            process.push(
                ApiCall::new("ModifyVpnGateway")
                    .with_params(params)
                    .via(&self.clients.vpc()),
            );
        }
        Ok(process)
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        Ok(ApiProcess::new().call(VPN_GATEWAYS.delete_call(
            &self.clients.vpc(),
            "DeleteVpnGateway",
            "VpnGatewayId",
            data.id(),
        )))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = VPN_GATEWAYS.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("VpnGatewayId", FieldResponse::ignore())
                .apply(&item, data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SdkError;
    use crate::resources::testing;
    use crate::transport::ScriptedTransport;
    use ksyun_core::provider::{create_with, delete_with, update_with};
    use serde_json::json;
    use std::collections::HashMap;

    fn prior() -> HashMap<String, Value> {
        HashMap::from([
            ("vpc_id".to_string(), Value::from("vpc-1")),
            ("vpn_gateway_name".to_string(), Value::from("office")),
            ("band_width".to_string(), Value::Int(5)),
            ("charge_type".to_string(), Value::from("Monthly")),
            ("purchase_time".to_string(), Value::Int(1)),
        ])
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("CreateVpnGateway", json!({"VpnGatewayId": "vpn-1"}))
            .always(
                "DescribeVpnGateways",
                json!({"VpnGatewaySet": [{
                    "VpnGatewayId": "vpn-1",
                    "VpnGatewayName": "office",
                    "VpcId": "vpc-1",
                    "BandWidth": 5,
                    "ChargeType": "Monthly",
                    "VpnGatewayVersion": "1.0",
                    "ProjectId": "0",
                    "CreateTime": "2026-01-01 00:00:00"
                }]}),
            );
        let adapter = VpnGatewayAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::planned("vpn_gateway", prior());
        create_with(&adapter, &mut data).await.unwrap();

        assert_eq!(data.id(), "vpn-1");
        assert_eq!(data.get_str("project_id"), Some("0"));
        let requests = transport.requests_for("CreateVpnGateway");
        assert_eq!(requests[0].param_str("VpnGatewayVersion"), Some("1.0"));
        assert_eq!(requests[0].params.get("PurchaseTime"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn update_sends_bandwidth_only() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("ModifyVpnGateway", json!({"Return": true}))
            .always("DescribeVpnGateways", json!({"VpnGatewaySet": [{"VpnGatewayId": "vpn-1"}]}));
        let adapter = VpnGatewayAdapter::new(testing::registry(&transport));

        let mut planned = prior();
        planned.insert("band_width".to_string(), Value::Int(10));
        let mut data = ResourceData::new("vpn_gateway")
            .with_id("vpn-1")
            .with_prior(prior())
            .with_planned(planned);
        update_with(&adapter, &mut data).await.unwrap();

        let requests = transport.requests_for("ModifyVpnGateway");
        assert_eq!(requests[0].params.len(), 2);
        assert_eq!(requests[0].params.get("BandWidth"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn delete_of_missing_gateway_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(
            "DeleteVpnGateway",
            SdkError::new("VpnGatewayNotFound", "vpn-1", 400),
        );
        let adapter = VpnGatewayAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("vpn_gateway").with_id("vpn-1");
        delete_with(&adapter, &mut data).await.unwrap();
        assert!(data.is_gone());
        assert_eq!(transport.actions(), vec!["DeleteVpnGateway"]);
    }
}
