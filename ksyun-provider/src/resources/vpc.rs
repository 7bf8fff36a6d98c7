//! VPC resource
//!
//! Deleting a VPC first removes its custom routes, which otherwise keep the
//! VPC in use.

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::{FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper};
use log::debug;
use serde_json::Value as Json;

use super::{ClientCall, Lookup, response_id, route, single, tags};
use crate::client::ClientRegistry;

const VPCS: Lookup = Lookup {
    action: "DescribeVpcs",
    id_param: "VpcId.1",
    set: "VpcSet",
    what: "vpc",
};

pub struct VpcAdapter {
    clients: Arc<ClientRegistry>,
}

impl VpcAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for VpcAdapter {
    fn name(&self) -> &'static str {
        "vpc"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpc")
            .with_description("Virtual private cloud")
            .attribute(AttributeSchema::new("vpc_name", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("cidr_block", types::cidr())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("is_default", AttributeType::Bool)
                    .with_default(Value::Bool(false))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("tags", types::tags()))
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let params = RequestMapper::create(&schema)
            .transform("tags", FieldTransform::ignore())
            .build(data)?;

        let create = ApiCall::new("CreateVpc")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "VpcId")?);
                    Ok(())
                })
            });

        Ok(ApiProcess::new()
            .call(create)
            .then(tags::sync_process(&self.clients.tag(), "vpc", data)))
    }

    fn update_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let mut params = RequestMapper::update(&schema)
            .transform("tags", FieldTransform::ignore())
            .build(data)?;

        let mut process = ApiProcess::new();
        if !params.is_empty() {
            params.insert("VpcId".to_string(), Json::from(data.id()));
            process.push(ApiCall::new("ModifyVpc").with_params(params).via(&self.clients.vpc()));
        }
        if schema.has_change(data, "tags") {
            process = process.then(tags::sync_process(&self.clients.tag(), "vpc", data));
        }
        Ok(process)
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let vpc = self.clients.vpc();
        let sweeper = Arc::clone(&vpc);

        let delete = VPCS
            .delete_call(&vpc, "DeleteVpc", "VpcId", data.id())
            .on_before(move |_call, data| {
                let client = Arc::clone(&sweeper);
                Box::pin(async move {
                    let routes = match route::routes_in_vpc(&client, data.id()).await {
                        Ok(routes) => routes,
                        Err(e) if e.is_not_found() => return Ok(true),
                        Err(e) => return Err(e),
                    };
                    for route in routes {
                        let belongs = route.get("VpcId").and_then(Json::as_str) == Some(data.id());
                        let custom = route.get("RouteType").and_then(Json::as_str) != Some("Local");
                        if let (true, true, Some(id)) =
                            (belongs, custom, route.get("RouteId").and_then(Json::as_str))
                        {
                            debug!("removing route {} before deleting vpc {}", id, data.id());
                            match client.call("DeleteRoute", &single("RouteId", id)).await {
                                Ok(_) => {}
                                Err(e) if e.is_not_found() => {}
                                Err(e) => return Err(e),
                            }
                        }
                    }
                    Ok(true)
                })
            });

        Ok(ApiProcess::new().call(delete))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = VPCS.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("VpcId", FieldResponse::ignore())
                .entry("IsDefault", FieldResponse::to("is_default").keep_auto())
                .apply(&item, data)?;

            let tags = tags::read(&self.clients.tag(), "vpc", data.id()).await?;
            data.set("tags", tags);
            Ok(())
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

    fn script_read(transport: &ScriptedTransport) {
        transport
            .always(
                "DescribeVpcs",
                json!({"VpcSet": [{
                    "VpcId": "vpc-1",
                    "VpcName": "tf-vpc",
                    "CidrBlock": "10.0.0.0/16",
                    "IsDefault": false,
                    "CreateTime": "2026-01-01 00:00:00"
                }]}),
            )
            .always("DescribeTags", json!({"TagSet": [{"TagKey": "env", "TagValue": "prod"}]}));
    }

    #[tokio::test]
    async fn create_then_tag_then_read() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("CreateVpc", json!({"VpcId": "vpc-1"}))
            .always("CreateTags", json!({"Result": true}));
        script_read(&transport);
        let adapter = VpcAdapter::new(testing::registry(&transport));

        let mut tags = HashMap::new();
        tags.insert("env".to_string(), Value::from("prod"));
        let mut data = ResourceData::new("vpc")
            .with_attribute("vpc_name", "tf-vpc")
            .with_attribute("cidr_block", "10.0.0.0/16")
            .with_attribute("tags", Value::Map(tags));

        create_with(&adapter, &mut data).await.unwrap();

        assert_eq!(data.id(), "vpc-1");
        assert_eq!(data.get_str("create_time"), Some("2026-01-01 00:00:00"));
        assert_eq!(
            transport.actions(),
            vec!["CreateVpc", "CreateTags", "DescribeVpcs", "DescribeTags"]
        );
        let requests = transport.requests();
        let create = &requests[0];
        assert_eq!(create.param_str("CidrBlock"), Some("10.0.0.0/16"));
        assert_eq!(create.params.get("IsDefault"), Some(&json!(false)));
        assert!(!create.params.contains_key("Tags"));
    }

    #[tokio::test]
    async fn update_sends_only_changed_name() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("ModifyVpc", json!({"Result": true}));
        script_read(&transport);
        let adapter = VpcAdapter::new(testing::registry(&transport));

        let prior = HashMap::from([
            ("vpc_name".to_string(), Value::from("old")),
            ("cidr_block".to_string(), Value::from("10.0.0.0/16")),
        ]);
        let mut planned = prior.clone();
        planned.insert("vpc_name".to_string(), Value::from("tf-vpc"));
        let mut data = ResourceData::new("vpc")
            .with_id("vpc-1")
            .with_prior(prior)
            .with_planned(planned);

        update_with(&adapter, &mut data).await.unwrap();

        let requests = transport.requests_for("ModifyVpc");
        let modify = &requests[0];
        assert_eq!(modify.params.len(), 2);
        assert_eq!(modify.param_str("VpcName"), Some("tf-vpc"));
        assert_eq!(modify.param_str("VpcId"), Some("vpc-1"));
        assert!(transport.requests_for("CreateTags").is_empty());
    }

    #[tokio::test]
    async fn delete_sweeps_custom_routes_first() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond(
                "DescribeRoutes",
                json!({"RouteSet": [
                    {"RouteId": "r-local", "VpcId": "vpc-1", "RouteType": "Local"},
                    {"RouteId": "r-1", "VpcId": "vpc-1", "RouteType": "Host"},
                    {"RouteId": "r-2", "VpcId": "vpc-2", "RouteType": "Host"}
                ]}),
            )
            .always("DeleteRoute", json!({"Return": true}))
            .respond("DeleteVpc", json!({"Return": true}));
        let adapter = VpcAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("vpc").with_id("vpc-1");
        delete_with(&adapter, &mut data).await.unwrap();

        assert!(data.is_gone());
        assert_eq!(
            transport.actions(),
            vec!["DescribeRoutes", "DeleteRoute", "DeleteVpc"]
        );
        assert_eq!(transport.requests()[1].param_str("RouteId"), Some("r-1"));
    }

    #[tokio::test]
    async fn delete_in_use_polls_until_gone() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .always("DescribeRoutes", json!({"RouteSet": []}))
            .fail("DeleteVpc", SdkError::new("VpcInUse", "vpc has subnets", 400))
            .fail("DescribeVpcs", SdkError::new("InvalidVpc.NotFound", "vpc-1", 400));
        let adapter = VpcAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("vpc").with_id("vpc-1");
        delete_with(&adapter, &mut data).await.unwrap();

        // Not found on the first poll: DeleteVpc is not sent again
        assert_eq!(
            transport.actions(),
            vec!["DescribeRoutes", "DeleteVpc", "DescribeVpcs"]
        );
        assert!(data.is_gone());
    }
}
