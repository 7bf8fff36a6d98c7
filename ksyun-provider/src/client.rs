//! Service clients and the lazily initialised client registry

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ksyun_core::call::RequestParams;
use ksyun_core::provider::{ProviderError, ProviderResult};
use ksyun_core::retry::{Attempt, RetryPolicy, retry};
use log::debug;
use serde_json::Value as Json;

use crate::config::ProviderConfig;
use crate::errors::SdkError;
use crate::transport::{ApiRequest, HttpSettings, Transport};

/// Ksyun product family reached by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Vpc,
    Tag,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Vpc => "vpc",
            Service::Tag => "tagv2",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            Service::Vpc => "2016-03-04",
            Service::Tag => "2020-09-01",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Client for one service: endpoint, API version, region and SDK retries
pub struct ServiceClient {
    service: Service,
    endpoint: String,
    region: String,
    dry_run: bool,
    http: HttpSettings,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl ServiceClient {
    /// Delay between SDK-level retries of transient errors
    const RETRY_DELAY: Duration = Duration::from_millis(500);

    pub fn new(service: Service, config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        let http = config.http_settings();
        let attempts = config.max_retries.saturating_add(1);
        // Room for every attempt to run into its own timeout
        let budget = http
            .timeout
            .saturating_mul(attempts)
            .saturating_add(Self::RETRY_DELAY.saturating_mul(config.max_retries));
        let retry = RetryPolicy::fixed(budget, Self::RETRY_DELAY).with_max_attempts(attempts);
        Self {
            service,
            endpoint: config.endpoint(service.name()),
            region: config.api_region(),
            dry_run: config.dry_run,
            http,
            retry,
            transport,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the request for `action` as it would be sent
    pub fn request(&self, action: &str, params: &RequestParams) -> ApiRequest {
        let mut params = params.clone();
        if self.dry_run {
            params.insert("DryRun".to_string(), Json::Bool(true));
        }
        ApiRequest {
            service: self.service.name().to_string(),
            version: self.service.version().to_string(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            action: action.to_string(),
            params,
            http: self.http.clone(),
        }
    }

    /// Send one call, retrying transient errors up to `max_retries` times
    ///
    /// Each attempt is cut off after the configured timeout and counts as a
    /// transient failure.
    pub async fn call(&self, action: &str, params: &RequestParams) -> ProviderResult<Json> {
        let request = self.request(action, params);
        let request = &request;
        debug!("{} {} {:?}", self.service, action, request.params);

        retry(&self.retry, || async move {
            let limit = request.http.timeout;
            let sent = tokio::time::timeout(limit, self.transport.send(request))
                .await
                .unwrap_or_else(|_| Err(SdkError::timeout(&request.action, limit)));
            match sent {
                Ok(response) => Attempt::Done(response),
                Err(err) => {
                    let err = ProviderError::from(err);
                    if err.is_transient() {
                        Attempt::Retry(err)
                    } else {
                        Attempt::Fail(err)
                    }
                }
            }
        })
        .await
    }
}

/// One lazily created client per service, shared afterwards
pub struct ClientRegistry {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
    vpc: OnceLock<Arc<ServiceClient>>,
    tag: OnceLock<Arc<ServiceClient>>,
}

impl ClientRegistry {
    pub fn new(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            vpc: OnceLock::new(),
            tag: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn client(&self, service: Service) -> Arc<ServiceClient> {
        let cell = match service {
            Service::Vpc => &self.vpc,
            Service::Tag => &self.tag,
        };
        cell.get_or_init(|| {
            debug!("initialising {} client", service);
            Arc::new(ServiceClient::new(
                service,
                &self.config,
                Arc::clone(&self.transport),
            ))
        })
        .clone()
    }

    pub fn vpc(&self) -> Arc<ServiceClient> {
        self.client(Service::Vpc)
    }

    pub fn tag(&self) -> Arc<ServiceClient> {
        self.client(Service::Tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> ProviderConfig {
        ProviderConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            region: "cn-beijing-6".to_string(),
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn call_adds_endpoint_version_and_dry_run() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeVpcs", json!({"VpcSet": []}));
        let client = ServiceClient::new(
            Service::Vpc,
            &ProviderConfig {
                dry_run: true,
                ..config()
            },
            transport.clone(),
        );

        client.call("DescribeVpcs", &RequestParams::new()).await.unwrap();

        let requests = transport.requests();
        let sent = &requests[0];
        assert_eq!(sent.endpoint, "https://vpc.api.ksyun.com");
        assert_eq!(sent.version, "2016-03-04");
        assert_eq!(sent.region, "cn-beijing-6");
        assert_eq!(sent.params.get("DryRun"), Some(&json!(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_max_retries() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .fail("CreateVpc", SdkError::new("Throttling", "slow down", 400))
            .fail("CreateVpc", SdkError::new("Throttling", "slow down", 400))
            .respond("CreateVpc", json!({"VpcId": "vpc-1"}));
        let client = ServiceClient::new(Service::Vpc, &config(), transport.clone());

        let response = client.call("CreateVpc", &RequestParams::new()).await.unwrap();
        assert_eq!(response["VpcId"], "vpc-1");
        assert_eq!(transport.actions().len(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("CreateVpc", SdkError::new("InvalidParameter", "bad cidr", 400));
        let client = ServiceClient::new(Service::Vpc, &config(), transport.clone());

        let err = client.call("CreateVpc", &RequestParams::new()).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(transport.actions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_gives_up_at_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.always("CreateVpc", json!({}));
        transport.fail("CreateVpc", SdkError::new("Busy", "try later", 400));
        let client = ServiceClient::new(
            Service::Vpc,
            &ProviderConfig {
                max_retries: 0,
                ..config()
            },
            transport.clone(),
        );

        let err = client.call("CreateVpc", &RequestParams::new()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(transport.actions().len(), 1);
    }

    /// Never answers
    struct Stalled {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Transport for Stalled {
        async fn send(&self, _request: &ApiRequest) -> Result<Json, SdkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_cut_off_at_the_timeout() {
        let transport = Arc::new(Stalled {
            attempts: AtomicU32::new(0),
        });
        let client = ServiceClient::new(
            Service::Vpc,
            &ProviderConfig {
                timeout: 5,
                max_retries: 2,
                ..config()
            },
            transport.clone(),
        );

        let started = tokio::time::Instant::now();
        let err = client.call("DescribeVpcs", &RequestParams::new()).await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("RequestTimeout: DescribeVpcs"));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn requests_carry_http_settings() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("DescribeVpcs", json!({"VpcSet": []}));
        let client = ServiceClient::new(
            Service::Vpc,
            &ProviderConfig {
                http_proxy: Some("http://proxy.internal:3128".to_string()),
                http_keepalive: true,
                timeout: 10,
                ..config()
            },
            transport.clone(),
        );

        client.call("DescribeVpcs", &RequestParams::new()).await.unwrap();

        let requests = transport.requests();
        let http = &requests[0].http;
        assert_eq!(http.proxy.as_deref(), Some("http://proxy.internal:3128"));
        assert!(http.keepalive);
        assert_eq!(http.timeout, Duration::from_secs(10));
    }

    #[test]
    fn extreme_retry_settings_do_not_overflow() {
        let client = ServiceClient::new(
            Service::Vpc,
            &ProviderConfig {
                timeout: u64::MAX,
                max_retries: u32::MAX,
                ..config()
            },
            Arc::new(ScriptedTransport::new()),
        );
        let request = client.request("DescribeVpcs", &RequestParams::new());
        assert_eq!(request.http.timeout, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn registry_shares_clients() {
        let registry = ClientRegistry::new(config(), Arc::new(ScriptedTransport::new()));
        assert!(Arc::ptr_eq(&registry.vpc(), &registry.vpc()));
        assert_eq!(registry.tag().endpoint(), "https://tagv2.api.ksyun.com");
        assert_eq!(registry.vpc().service(), Service::Vpc);
    }
}
