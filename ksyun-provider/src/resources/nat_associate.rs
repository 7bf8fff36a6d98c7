//! Association of a NAT gateway with a subnet
//!
//! The association has no ID of its own; it is tracked as `nat_id:subnet_id`.

use std::sync::Arc;

use ksyun_core::call::ApiCall;
use ksyun_core::process::ApiProcess;
use ksyun_core::provider::{BoxFuture, ProviderError, ProviderResult, ResourceAdapter};
use ksyun_core::resource::{ResourceData, Value};
use ksyun_core::retry::RetryPolicy;
use ksyun_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use serde_json::Value as Json;

use super::nat::NATS;
use super::{ClientCall, required_str};
use crate::client::ClientRegistry;

/// Split `nat_id:subnet_id`
fn parse_id(id: &str) -> ProviderResult<(&str, &str)> {
    match id.split_once(':') {
        Some((nat, subnet)) if !nat.is_empty() && !subnet.is_empty() && !subnet.contains(':') => {
            Ok((nat, subnet))
        }
        _ => Err(ProviderError::validation(format!(
            "invalid nat association ID {:?}, expected nat_id:subnet_id",
            id
        ))),
    }
}

pub struct NatAssociateAdapter {
    clients: Arc<ClientRegistry>,
}

impl NatAssociateAdapter {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self { clients }
    }
}

impl ResourceAdapter for NatAssociateAdapter {
    fn name(&self) -> &'static str {
        "nat_associate"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("nat_associate")
            .attribute(AttributeSchema::new("nat_id", AttributeType::String).required().force_new())
            .attribute(AttributeSchema::new("subnet_id", AttributeType::String).required().force_new())
    }

    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let nat_id = required_str(data, "nat_id")?;
        let subnet_id = required_str(data, "subnet_id")?;

        // The NAT may still be provisioning right after its creation
        let associate = ApiCall::new("AssociateNat")
            .param("NatId", nat_id)
            .param("SubnetId", subnet_id)
            .via(&self.clients.vpc())
            .retry_transient(RetryPolicy::transient())
            .on_after(|call, data| {
                Box::pin(async move {
                    let (Some(nat), Some(subnet)) =
                        (call.param_str("NatId"), call.param_str("SubnetId"))
                    else {
                        return Err(ProviderError::new("AssociateNat sent without IDs"));
                    };
                    data.set_id(format!("{}:{}", nat, subnet));
                    Ok(())
                })
            });
        Ok(ApiProcess::new().call(associate))
    }

    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess> {
        let (nat_id, subnet_id) = parse_id(data.id())?;
        let dissociate = ApiCall::new("DissociateNat")
            .param("NatId", nat_id)
            .param("SubnetId", subnet_id)
            .via(&self.clients.vpc())
            .ignore_not_found();
        Ok(ApiProcess::new().call(dissociate))
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let (nat_id, subnet_id) = parse_id(data.id())?;
            let (nat_id, subnet_id) = (nat_id.to_string(), subnet_id.to_string());

            let nat = NATS.fetch(&self.clients.vpc(), &nat_id).await?;
            let associated = nat
                .get("AssociateNatSet")
                .and_then(Json::as_array)
                .is_some_and(|set| {
                    set.iter()
                        .any(|a| a.get("SubnetId").and_then(Json::as_str) == Some(subnet_id.as_str()))
                });
            if !associated {
                return Err(ProviderError::not_found(format!(
                    "subnet {:?} is not associated with nat {:?}",
                    subnet_id, nat_id
                )));
            }

            data.set("nat_id", Value::from(nat_id));
            data.set("subnet_id", Value::from(subnet_id));
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
    use ksyun_core::provider::{create_with, delete_with, read_with};
    use serde_json::json;

    fn associated(subnets: &[&str]) -> Json {
        let set: Vec<Json> = subnets.iter().map(|s| json!({"SubnetId": s})).collect();
        json!({"NatSet": [{"NatId": "nat-1", "AssociateNatSet": set}]})
    }

    #[test]
    fn parses_composite_id() {
        assert_eq!(parse_id("nat-1:subnet-1").unwrap(), ("nat-1", "subnet-1"));
        assert!(parse_id("nat-1").unwrap_err().is_validation());
        assert!(parse_id(":subnet-1").is_err());
        assert!(parse_id("a:b:c").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn associate_retries_while_nat_is_busy() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .fail("AssociateNat", SdkError::new("NatInUse", "nat is processing", 400))
            .respond("AssociateNat", json!({"Return": true}))
            .always("DescribeNats", associated(&["subnet-1"]));
        let adapter = NatAssociateAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("nat_associate")
            .with_attribute("nat_id", "nat-1")
            .with_attribute("subnet_id", "subnet-1");
        create_with(&adapter, &mut data).await.unwrap();

        assert_eq!(data.id(), "nat-1:subnet-1");
        assert_eq!(
            transport.actions(),
            vec!["AssociateNat", "AssociateNat", "DescribeNats"]
        );
    }

    #[tokio::test]
    async fn dropped_association_is_removed_from_state() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeNats", associated(&["subnet-2"]));
        let adapter = NatAssociateAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("nat_associate").with_id("nat-1:subnet-1");
        read_with(&adapter, &mut data).await.unwrap();
        assert!(data.is_gone());
    }

    #[tokio::test]
    async fn malformed_id_fails_read() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = NatAssociateAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("nat_associate").with_id("nat-1");
        let err = read_with(&adapter, &mut data).await.unwrap_err();
        assert!(err.is_validation());
        assert!(transport.actions().is_empty());
    }

    #[tokio::test]
    async fn dissociate_tolerates_missing_association() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("DissociateNat", SdkError::new("Nat.NotFound", "nat-1", 404));
        let adapter = NatAssociateAdapter::new(testing::registry(&transport));

        let mut data = ResourceData::new("nat_associate").with_id("nat-1:subnet-1");
        delete_with(&adapter, &mut data).await.unwrap();

        assert!(data.is_gone());
        let requests = transport.requests();
        assert_eq!(requests[0].param_str("SubnetId"), Some("subnet-1"));
    }
}
