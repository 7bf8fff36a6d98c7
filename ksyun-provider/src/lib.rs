//! Ksyun Provider
//!
//! Kingsoft Cloud VPC-family resources on top of the `ksyun-core` engine.
//!
//! ## Module Structure
//!
//! - `config` - Provider settings from JSON or `KSYUN_*` variables
//! - `transport` - The seam to the signed HTTP layer, plus a scripted one
//! - `client` - Per-service clients and their registry
//! - `errors` - SDK errors and their classification
//! - `resources` - One adapter per resource type
//! - `utils` - Region names and address arithmetic

pub mod client;
pub mod config;
pub mod errors;
pub mod resources;
pub mod transport;
pub mod utils;

use std::sync::Arc;

pub use client::{ClientRegistry, Service, ServiceClient};
pub use config::{ConfigError, ProviderConfig};
pub use errors::SdkError;
pub use transport::{ApiRequest, ScriptedTransport, Transport};

use ksyun_core::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceAdapter, create_with,
    delete_with, read_with, update_with,
};
use ksyun_core::resource::ResourceData;
use ksyun_core::schema::ResourceSchema;

/// Kingsoft Cloud provider
pub struct KsyunProvider {
    clients: Arc<ClientRegistry>,
    adapters: Vec<Box<dyn ResourceAdapter>>,
}

impl KsyunProvider {
    /// Create a provider sending its calls through `transport`
    pub fn new(config: ProviderConfig, transport: Arc<dyn Transport>) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|e| ProviderError::validation(e.to_string()).with_cause(e))?;

        let clients = Arc::new(ClientRegistry::new(config, transport));
        let adapters = resources::adapters(&clients);
        Ok(Self { clients, adapters })
    }

    pub fn config(&self) -> &ProviderConfig {
        self.clients.config()
    }

    /// Adapter for a resource type
    pub fn adapter(&self, resource_type: &str) -> ProviderResult<&dyn ResourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == resource_type)
            .map(|a| a.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!("Unknown resource type: {}", resource_type))
            })
    }
}

impl Provider for KsyunProvider {
    fn name(&self) -> &'static str {
        "ksyun"
    }

    fn resource_types(&self) -> Vec<ResourceSchema> {
        let mut schemas: Vec<_> = self.adapters.iter().map(|a| a.schema()).collect();
        schemas.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        schemas
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let adapter = self.adapter(&data.resource_type)?;
            read_with(adapter, data).await
        })
    }

    fn create<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let adapter = self.adapter(&data.resource_type)?;
            create_with(adapter, data).await
        })
    }

    fn update<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let adapter = self.adapter(&data.resource_type)?;
            update_with(adapter, data).await
        })
    }

    fn delete<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let adapter = self.adapter(&data.resource_type)?;
            delete_with(adapter, data).await
        })
    }
}
