//! Provider - Traits abstracting resource operations
//!
//! A [`ResourceAdapter`] describes one cloud resource type: its schema and
//! the call sequences that create, update and delete it. A [`Provider`] is
//! what the host talks to; it dispatches to adapters and applies the shared
//! lifecycle conventions implemented by [`create_with`], [`read_with`],
//! [`update_with`] and [`delete_with`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use log::{debug, info};

use crate::process::ApiProcess;
use crate::resource::ResourceData;
use crate::schema::ResourceSchema;

/// Classification of a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The resource does not exist on the cloud side
    NotFound,
    /// Conflict or in-use condition that may clear up on retry
    Transient,
    /// Rejected locally before any network call
    Validation,
    /// Anything else
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub kind: ErrorKind,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Fatal,
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::NotFound)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Transient)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    /// Wrap with the verb and resource the error happened on
    ///
    /// `error on creating vpc "vpc-123", <message>`
    pub fn context(mut self, verb: &str, resource_type: &str, id: &str) -> Self {
        self.message = format!(
            "error on {} {} {:?}, {}",
            verb, resource_type, id, self.message
        );
        self
    }

    /// Fold several errors into one, keeping the kind when they all agree
    pub fn aggregate(errors: Vec<ProviderError>) -> Self {
        let kind = match errors.first() {
            Some(first) if errors.iter().all(|e| e.kind == first.kind) => first.kind,
            _ => ErrorKind::Fatal,
        };
        let message = errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(format!("{} call(s) failed: {}", errors.len(), message)).with_kind(kind)
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::new(format!("Failed to handle JSON: {}", err)).with_cause(err)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One cloud resource type
pub trait ResourceAdapter: Send + Sync {
    /// Resource type name (e.g., "vpc")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;

    /// Calls that create the resource and assign its ID
    fn create_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess>;

    /// Calls that apply the planned changes in place
    fn update_process(&self, _data: &ResourceData) -> ProviderResult<ApiProcess> {
        Err(ProviderError::validation(format!(
            "Update not supported for {}, delete and recreate",
            self.name()
        )))
    }

    /// Calls that delete the resource
    fn delete_process(&self, data: &ResourceData) -> ProviderResult<ApiProcess>;

    /// Fetch the remote state into `data`
    ///
    /// Returns a not-found error when the resource no longer exists.
    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Main Provider trait
///
/// All operations mutate the given [`ResourceData`] in place. A resource that
/// is gone after an operation has an empty ID.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "ksyun")
    fn name(&self) -> &'static str;

    /// Schemas of the resource types this Provider can handle
    fn resource_types(&self) -> Vec<ResourceSchema>;

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>;

    fn create<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>;

    fn update<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>;

    fn delete<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<ResourceSchema> {
        (**self).resource_types()
    }

    fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).read(data)
    }

    fn create<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).create(data)
    }

    fn update<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).update(data)
    }

    fn delete<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        (**self).delete(data)
    }
}

/// Validate, run the create calls, then read the resource back
pub async fn create_with(
    adapter: &dyn ResourceAdapter,
    data: &mut ResourceData,
) -> ProviderResult<()> {
    let schema = adapter.schema();
    schema.validate(&data.state()).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ProviderError::validation(messages.join("; "))
    })?;

    let process = adapter
        .create_process(data)
        .map_err(|e| e.context("creating", adapter.name(), data.id()))?;
    process
        .run(data)
        .await
        .map_err(|e| e.context("creating", adapter.name(), data.id()))?;

    info!("created {} {}", adapter.name(), data.id());
    read_with(adapter, data).await
}

/// Read the resource; a resource that no longer exists is removed from state
pub async fn read_with(
    adapter: &dyn ResourceAdapter,
    data: &mut ResourceData,
) -> ProviderResult<()> {
    if data.is_gone() {
        return Ok(());
    }
    match adapter.read(data).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(
                "{} {} not found, removing from state",
                adapter.name(),
                data.id()
            );
            data.set_id("");
            Ok(())
        }
        Err(e) => Err(e.context("reading", adapter.name(), data.id())),
    }
}

/// Run the update calls, then read the resource back
pub async fn update_with(
    adapter: &dyn ResourceAdapter,
    data: &mut ResourceData,
) -> ProviderResult<()> {
    let process = adapter
        .update_process(data)
        .map_err(|e| e.context("updating", adapter.name(), data.id()))?;
    process
        .run(data)
        .await
        .map_err(|e| e.context("updating", adapter.name(), data.id()))?;

    info!("updated {} {}", adapter.name(), data.id());
    read_with(adapter, data).await
}

/// Run the delete calls and mark the resource gone
pub async fn delete_with(
    adapter: &dyn ResourceAdapter,
    data: &mut ResourceData,
) -> ProviderResult<()> {
    let process = adapter
        .delete_process(data)
        .map_err(|e| e.context("deleting", adapter.name(), data.id()))?;
    process
        .run(data)
        .await
        .map_err(|e| e.context("deleting", adapter.name(), data.id()))?;

    info!("deleted {} {}", adapter.name(), data.id());
    data.set_id("");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::ApiCall;
    use crate::resource::Value;
    use crate::schema::{AttributeSchema, AttributeType};
    use serde_json::json;

    // Mock adapter that "creates" by assigning a fixed ID
    struct MockAdapter {
        exists: bool,
    }

    impl ResourceAdapter for MockAdapter {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("mock")
                .attribute(AttributeSchema::new("name", AttributeType::String).required())
        }

        fn create_process(&self, _data: &ResourceData) -> ProviderResult<ApiProcess> {
            let call = ApiCall::new("CreateMock")
                .on_execute(|_call, _data| Box::pin(async { Ok(json!({"MockId": "mock-1"})) }))
                .on_after(|call, data| {
                    Box::pin(async move {
                        let id = call
                            .response_str("MockId")
                            .ok_or_else(|| ProviderError::new("no id"))?;
                        data.set_id(id);
                        Ok(())
                    })
                });
            Ok(ApiProcess::new().call(call))
        }

        fn delete_process(&self, _data: &ResourceData) -> ProviderResult<ApiProcess> {
            Ok(ApiProcess::new())
        }

        fn read<'a>(&'a self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
            let exists = self.exists;
            Box::pin(async move {
                if exists {
                    data.set("status", Value::from("active"));
                    Ok(())
                } else {
                    Err(ProviderError::not_found("mock not found"))
                }
            })
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_reads_back() {
        let adapter = MockAdapter { exists: true };
        let mut data = ResourceData::new("mock").with_attribute("name", "a");
        create_with(&adapter, &mut data).await.unwrap();
        assert_eq!(data.id(), "mock-1");
        assert_eq!(data.get_str("status"), Some("active"));
    }

    #[tokio::test]
    async fn create_rejects_invalid_attributes() {
        let adapter = MockAdapter { exists: true };
        let mut data = ResourceData::new("mock");
        let err = create_with(&adapter, &mut data).await.unwrap_err();
        assert!(err.is_validation());
        assert!(data.is_gone());
    }

    #[tokio::test]
    async fn read_not_found_removes_from_state() {
        let adapter = MockAdapter { exists: false };
        let mut data = ResourceData::new("mock").with_id("mock-1");
        read_with(&adapter, &mut data).await.unwrap();
        assert!(data.is_gone());
    }

    #[tokio::test]
    async fn update_defaults_to_unsupported() {
        let adapter = MockAdapter { exists: true };
        let mut data = ResourceData::new("mock").with_id("mock-1");
        let err = update_with(&adapter, &mut data).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("error on updating mock \"mock-1\""));
    }

    #[test]
    fn aggregate_keeps_common_kind() {
        let err = ProviderError::aggregate(vec![
            ProviderError::transient("a"),
            ProviderError::transient("b"),
        ]);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "2 call(s) failed: a; b");

        let mixed = ProviderError::aggregate(vec![
            ProviderError::transient("a"),
            ProviderError::not_found("b"),
        ]);
        assert_eq!(mixed.kind, ErrorKind::Fatal);
    }
}
