//! Route resource
//!
//! The next hop depends on `route_type`; each type requires its own target
//! attribute and rejects the others.

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::{FieldRule, FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper, lookup};
use serde_json::Value as Json;

use super::{ClientCall, Lookup, response_id};
use crate::client::{ClientRegistry, ServiceClient};

const ROUTES: Lookup = Lookup {
    action: "DescribeRoutes",
    id_param: "RouteId.1",
    set: "RouteSet",
    what: "route",
};

/// Route types and the attribute naming their next hop
const NEXT_HOPS: &[(&str, &str)] = &[
    ("Tunnel", "tunnel_id"),
    ("Host", "instance_id"),
    ("Peering", "vpc_peering_connection_id"),
    ("DirectConnect", "direct_connect_gateway_id"),
    ("Vpn", "vpn_tunnel_id"),
];

/// Routes of one VPC, filtered server-side by `vpc-id`
pub async fn routes_in_vpc(client: &ServiceClient, vpc_id: &str) -> ProviderResult<Vec<Json>> {
    let schema = ResourceSchema::new("route_filter").attribute(AttributeSchema::new(
        "vpc_id",
        AttributeType::list(AttributeType::String),
    ));
    let filter = ResourceData::new("route_filter")
        .with_attribute("vpc_id", Value::List(vec![Value::from(vpc_id)]));
    let params = RequestMapper::create(&schema)
        .transform("vpc_id", FieldTransform::filter_group())
        .build(&filter)?;

    let response = client.call(ROUTES.action, &params).await?;
    Ok(response
        .get(ROUTES.set)
        .and_then(Json::as_array)
        .cloned()
        .unwrap_or_default())
}

pub struct RouteAdapter {
    clients: Arc<ClientRegistry>,
}

impl RouteAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }

    fn rules() -> Vec<FieldRule> {
        let mut rules = Vec::new();
        for (route_type, target) in NEXT_HOPS {
            let mut rule = FieldRule::when("route_type", *route_type).requires(*target);
            for (_, other) in NEXT_HOPS.iter().filter(|(_, other)| other != target) {
                rule = rule.forbids(*other);
            }
            rules.push(rule);
        }
        let mut internet = FieldRule::when("route_type", "InternetGateway");
        for (_, target) in NEXT_HOPS {
            internet = internet.forbids(*target);
        }
        rules.push(internet);
        rules
    }
}

impl ResourceAdapter for RouteAdapter {
    fn name(&self) -> &'static str {
        "route"
    }

    fn schema(&self) -> ResourceSchema {
        let route_types = types::one_of(&[
            "InternetGateway",
            "Tunnel",
            "Host",
            "Peering",
            "DirectConnect",
            "Vpn",
        ]);
        let mut schema = ResourceSchema::new("route")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(
                AttributeSchema::new("destination_cidr_block", types::cidr())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("route_type", route_types).required().force_new())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only());
        for (_, target) in NEXT_HOPS {
            schema = schema.attribute(AttributeSchema::new(*target, AttributeType::String).force_new());
        }
        schema
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let mut mapper = RequestMapper::create(&schema);
        for rule in Self::rules() {
            mapper = mapper.rule(rule);
        }
        let params = mapper.build(data)?;

        let create = ApiCall::new("CreateRoute")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "RouteId")?);
                    Ok(())
                })
            });
        Ok(ApiProcess::new().call(create))
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        Ok(ApiProcess::new().call(ROUTES.delete_call(
            &self.clients.vpc(),
            "DeleteRoute",
            "RouteId",
            data.id(),
        )))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = ROUTES.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("RouteId", FieldResponse::ignore())
                .entry("NextHopSet", FieldResponse::ignore())
                .apply(&item, data)?;

            // The next hop comes back as a nested set whatever the route type
            let target = data
                .get_str("route_type")
                .and_then(|t| NEXT_HOPS.iter().find(|(route_type, _)| *route_type == t))
                .map(|(_, target)| *target);
            let gateway = lookup(&item, "NextHopSet.0.GatewayId").and_then(Json::as_str);
            if let (Some(target), Some(gateway)) = (target, gateway) {
                data.set(target, Value::from(gateway));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing;
    use crate::transport::ScriptedTransport;
    use ksyun_core::provider::create_with;
    use serde_json::json;

    fn adapter(transport: &Arc<ScriptedTransport>) -> RouteAdapter {
        RouteAdapter::new(testing::registry(transport))
    }

    #[tokio::test]
    async fn tunnel_route_requires_tunnel_id() {
        let transport = Arc::new(ScriptedTransport::new());
        let data = ResourceData::new("route")
            .with_attribute("vpc_id", "vpc-1")
            .with_attribute("destination_cidr_block", "10.1.0.0/16")
            .with_attribute("route_type", "Tunnel");

        let err = adapter(&transport).create_process(&data).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("tunnel_id is required"));
        assert!(transport.actions().is_empty());
    }

    #[test]
    fn host_route_rejects_other_targets() {
        let transport = Arc::new(ScriptedTransport::new());
        let data = ResourceData::new("route")
            .with_attribute("vpc_id", "vpc-1")
            .with_attribute("destination_cidr_block", "10.1.0.0/16")
            .with_attribute("route_type", "Host")
            .with_attribute("instance_id", "i-1")
            .with_attribute("tunnel_id", "t-1");

        let err = adapter(&transport).create_process(&data).unwrap_err();
        assert_eq!(err.to_string(), "tunnel_id must not be set when route_type is Host");
    }

    #[tokio::test]
    async fn creates_host_route() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("CreateRoute", json!({"RouteId": "r-1"}))
            .always(
                "DescribeRoutes",
                json!({"RouteSet": [{
                    "RouteId": "r-1",
                    "VpcId": "vpc-1",
                    "DestinationCidrBlock": "10.1.0.0/16",
                    "RouteType": "Host",
                    "NextHopSet": [{"GatewayId": "i-1"}]
                }]}),
            );

        let mut data = ResourceData::new("route")
            .with_attribute("vpc_id", "vpc-1")
            .with_attribute("destination_cidr_block", "10.1.0.0/16")
            .with_attribute("route_type", "Host")
            .with_attribute("instance_id", "i-1");
        create_with(&adapter(&transport), &mut data).await.unwrap();

        assert_eq!(data.id(), "r-1");
        assert_eq!(data.get_str("instance_id"), Some("i-1"));
        let requests = transport.requests_for("CreateRoute");
        assert_eq!(requests[0].param_str("InstanceId"), Some("i-1"));
        assert_eq!(requests[0].param_str("RouteType"), Some("Host"));
    }

    #[tokio::test]
    async fn routes_in_vpc_uses_filter_block() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeRoutes", json!({"RouteSet": [{"RouteId": "r-1"}]}));
        let clients = testing::registry(&transport);

        let routes = routes_in_vpc(&clients.vpc(), "vpc-9").await.unwrap();
        assert_eq!(routes.len(), 1);
        let requests = transport.requests();
        assert_eq!(requests[0].param_str("Filter.1.Name"), Some("vpc-id"));
        assert_eq!(requests[0].param_str("Filter.1.Value.1"), Some("vpc-9"));
    }
}
