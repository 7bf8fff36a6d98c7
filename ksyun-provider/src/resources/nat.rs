//! NAT gateway resource

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::mapping::{FieldTransform, RequestMapper};
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use ksyun_core::unmarshal::{FieldResponse, ResponseMapper, coerce};
use log::debug;
use serde_json::Value as Json;

use super::{ClientCall, Lookup, response_id, tags};
use crate::client::{ClientRegistry, ServiceClient};

pub(crate) const NATS: Lookup = Lookup {
    action: "DescribeNats",
    id_param: "NatId.1",
    set: "NatSet",
    what: "nat",
};

/// Bandwidth change, skipped when the gateway already runs at the target
fn bandwidth_call(client: &Arc<ServiceClient>, id: &str, band_width: i64) -> ApiCall {
    let reader = Arc::clone(client);
    ApiCall::new("ModifyNat")
        .param("NatId", id)
        .param("BandWidth", band_width)
        .via(client)
        .on_before(move |call, data| {
            let client = Arc::clone(&reader);
            Box::pin(async move {
                let item = NATS.fetch(&client, data.id()).await?;
                let current = item
                    .get("BandWidth")
                    .and_then(|raw| coerce(raw, &AttributeType::Int))
                    .and_then(|v| v.as_int());
                let target = call.params.get("BandWidth").and_then(Json::as_i64);
                if current.is_some() && current == target {
                    debug!("nat {} already at {:?} Mbps", data.id(), target);
                    return Ok(false);
                }
                Ok(true)
            })
        })
}

pub struct NatAdapter {
    clients: Arc<ClientRegistry>,
}

impl NatAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for NatAdapter {
    fn name(&self) -> &'static str {
        "nat"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("nat")
            .attribute(AttributeSchema::new("vpc_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("nat_name", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("nat_mode", types::one_of(&["Vpc", "Subnet"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("nat_type", types::one_of(&["public"]))
                    .with_default(Value::from("public"))
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("nat_ip_number", types::positive_int())
                    .with_default(Value::Int(1))
                    .force_new(),
            )
            .attribute(AttributeSchema::new("band_width", types::positive_int()).required())
            .attribute(AttributeSchema::new("charge_type", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("purchase_time", AttributeType::Int).force_new())
            .attribute(AttributeSchema::new("tags", types::tags()))
            .attribute(AttributeSchema::new("create_time", AttributeType::String).read_only())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let params = RequestMapper::create(&schema)
            .transform("tags", FieldTransform::ignore())
            .build(data)?;

        let create = ApiCall::new("CreateNat")
            .with_params(params)
            .via(&self.clients.vpc())
            .on_after(|call, data| {
                Box::pin(async move {
                    data.set_id(response_id(call, "NatId")?);
                    Ok(())
                })
            });

        Ok(ApiProcess::new()
            .call(create)
            .then(tags::sync_process(&self.clients.tag(), "nat", data)))
    }

    fn update_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let schema = self.schema();
        let vpc = self.clients.vpc();
        let mut process = ApiProcess::new();

        let mut params = RequestMapper::update(&schema)
            .transform("tags", FieldTransform::ignore())
            .transform("band_width", FieldTransform::ignore())
            .build(data)?;
        if !params.is_empty() {
            params.insert("NatId".to_string(), Json::from(data.id()));
            process.push(ApiCall::new("ModifyNat").with_params(params).via(&vpc));
        }

        if schema.has_change(data, "band_width")
            && let Some(band_width) = data.get_planned("band_width").and_then(Value::as_int)
        {
            process.push(bandwidth_call(&vpc, data.id(), band_width));
        }

        if schema.has_change(data, "tags") {
            process = process.then(tags::sync_process(&self.clients.tag(), "nat", data));
        }
        Ok(process)
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        Ok(ApiProcess::new().call(NATS.delete_call(
            &self.clients.vpc(),
            "DeleteNat",
            "NatId",
            data.id(),
        )))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let item = NATS.fetch(&self.clients.vpc(), data.id()).await?;
            let schema = self.schema();
            ResponseMapper::new(&schema)
                .entry("NatId", FieldResponse::ignore())
                .entry("AssociateNatSet", FieldResponse::ignore())
                .apply(&item, data)?;

            let tags = tags::read(&self.clients.tag(), "nat", data.id()).await?;
            data.set("tags", tags);
            Ok(())
        })
    }
}
