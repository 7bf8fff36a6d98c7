//! Resource adapters for the Ksyun VPC service family
//!
//! Each adapter owns its schema and the call sequences for one resource type.
//! This module holds the pieces they share: binding calls to a service
//! client, describe lookups and deletion polling.

pub mod nat;
pub mod nat_associate;
pub mod route;
pub mod security_group;
pub mod security_group_entry;
pub mod subnet;
pub mod tags;
pub mod vpc;
pub mod vpn_gateway;

use std::sync::Arc;

use ksyun_core::call::{ApiCall, CallState, RequestParams};
use ksyun_core::provider::{ProviderError, ProviderResult, ResourceAdapter};
use ksyun_core::resource::ResourceData;
use ksyun_core::retry::RetryPolicy;
use ksyun_core::unmarshal::lookup;
use serde_json::Value as Json;

use crate::client::{ClientRegistry, ServiceClient};

/// Returns every adapter supported by this provider
pub fn adapters(clients: &Arc<ClientRegistry>) -> Vec<Box<dyn ResourceAdapter>> {
    vec![
        Box::new(vpc::VpcAdapter::new(clients.clone())),
        Box::new(subnet::SubnetAdapter::new(clients.clone())),
        Box::new(security_group::SecurityGroupAdapter::new(clients.clone())),
        Box::new(security_group_entry::SecurityGroupEntryAdapter::new(clients.clone())),
        Box::new(nat::NatAdapter::new(clients.clone())),
        Box::new(nat_associate::NatAssociateAdapter::new(clients.clone())),
        Box::new(route::RouteAdapter::new(clients.clone())),
        Box::new(vpn_gateway::VpnGatewayAdapter::new(clients.clone())),
    ]
}

/// Bind a call's `execute_call` to a service client
pub trait ClientCall {
    fn via(self, client: &Arc<ServiceClient>) -> Self;
}

impl ClientCall for ApiCall {
    fn via(self, client: &Arc<ServiceClient>) -> Self {
        let client = Arc::clone(client);
        self.on_execute(move |call, _data| {
            let client = Arc::clone(&client);
            Box::pin(async move { client.call(&call.action, &call.params).await })
        })
    }
}

/// Request parameters holding a single value
pub(crate) fn single(name: &str, value: impl Into<Json>) -> RequestParams {
    RequestParams::from([(name.to_string(), value.into())])
}

/// ID at `path` of a call's response
pub(crate) fn response_id(call: &CallState, path: &str) -> ProviderResult<String> {
    call.response_str(path)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::new(format!("{} returned no {}", call.action, path)))
}

/// Attribute that must be set for a call to make sense
pub(crate) fn required_str<'d>(data: &'d ResourceData, name: &str) -> ProviderResult<&'d str> {
    data.get_str(name)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::validation(format!("{} is required", name)))
}

/// How to find one resource through its Describe action
#[derive(Debug, Clone, Copy)]
pub struct Lookup {
    pub action: &'static str,
    /// ID filter parameter (e.g., "VpcId.1")
    pub id_param: &'static str,
    /// Response list holding the matches (e.g., "VpcSet")
    pub set: &'static str,
    pub what: &'static str,
}

impl Lookup {
    /// Describe one resource; an empty result is a not-found error
    pub async fn fetch(&self, client: &ServiceClient, id: &str) -> ProviderResult<Json> {
        if id.is_empty() {
            return Err(ProviderError::not_found(format!("{} has no ID", self.what)));
        }
        let response = client.call(self.action, &single(self.id_param, id)).await?;
        lookup(&response, self.set)
            .and_then(Json::as_array)
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("{} {:?} not found", self.what, id)))
    }

    /// Delete call that polls until the resource is gone
    ///
    /// Re-sends `action` while the resource still exists; not-found from
    /// either side ends the call.
    pub fn delete_call(
        self,
        client: &Arc<ServiceClient>,
        action: &str,
        id_name: &str,
        id: &str,
    ) -> ApiCall {
        let poller = Arc::clone(client);
        ApiCall::new(action)
            .param(id_name, id)
            .via(client)
            .retry_until_gone(RetryPolicy::delete(), move |data| {
                let client = Arc::clone(&poller);
                Box::pin(async move { self.fetch(&client, data.id()).await.map(|_| ()) })
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::client::ClientRegistry;
    use crate::config::ProviderConfig;
    use crate::transport::ScriptedTransport;

    /// Registry over a scripted transport without SDK-level retries
    pub fn registry(transport: &Arc<ScriptedTransport>) -> Arc<ClientRegistry> {
        let config = ProviderConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            region: "cn-beijing-6".to_string(),
            max_retries: 0,
            ..ProviderConfig::default()
        };
        Arc::new(ClientRegistry::new(config, transport.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SdkError;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    const VPCS: Lookup = Lookup {
        action: "DescribeVpcs",
        id_param: "VpcId.1",
        set: "VpcSet",
        what: "vpc",
    };

    #[tokio::test]
    async fn fetch_returns_first_match() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeVpcs", json!({"VpcSet": [{"VpcId": "vpc-1"}]}));
        let clients = testing::registry(&transport);

        let item = VPCS.fetch(&clients.vpc(), "vpc-1").await.unwrap();
        assert_eq!(item["VpcId"], "vpc-1");
        assert_eq!(
            transport.requests()[0].param_str("VpcId.1"),
            Some("vpc-1")
        );
    }

    #[tokio::test]
    async fn fetch_empty_set_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeVpcs", json!({"VpcSet": []}));
        let clients = testing::registry(&transport);

        let err = VPCS.fetch(&clients.vpc(), "vpc-1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_call_stops_when_describe_finds_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .fail("DeleteVpc", SdkError::new("VpcInUse", "dependent resources", 400))
            .respond("DescribeVpcs", json!({"VpcSet": []}));
        let clients = testing::registry(&transport);

        let mut call = VPCS.delete_call(&clients.vpc(), "DeleteVpc", "VpcId", "vpc-1");
        let mut data = ResourceData::new("vpc").with_id("vpc-1");
        call.run(&mut data).await.unwrap();

        assert_eq!(transport.actions(), vec!["DeleteVpc", "DescribeVpcs"]);
    }
}
