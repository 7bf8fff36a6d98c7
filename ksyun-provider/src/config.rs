//! Provider configuration
//!
//! Loaded from a JSON file or from `KSYUN_*` environment variables. Values
//! from the environment override the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::HttpSettings;
use crate::utils::normalize_region;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// API domain; endpoints are `<service>.<domain>`
    pub domain: String,
    pub use_ssl: bool,
    pub http_proxy: Option<String>,
    /// SDK-level retries of transient errors
    pub max_retries: u32,
    pub http_keepalive: bool,
    /// Send `DryRun=true` with every call
    pub dry_run: bool,
    /// Use the bare domain as the endpoint for every service
    pub ignore_service: bool,
    /// Timeout of one attempt in seconds; SDK retries get one such slot each
    pub timeout: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            region: String::new(),
            domain: Self::DEFAULT_DOMAIN.to_string(),
            use_ssl: true,
            http_proxy: None,
            max_retries: 3,
            http_keepalive: false,
            dry_run: false,
            ignore_service: false,
            timeout: 60,
        }
    }
}

impl ProviderConfig {
    pub const DEFAULT_DOMAIN: &'static str = "api.ksyun.com";

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    /// Apply `KSYUN_*` overrides read through `lookup`
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("KSYUN_ACCESS_KEY") {
            self.access_key = v;
        }
        if let Some(v) = lookup("KSYUN_SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some(v) = lookup("KSYUN_REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("KSYUN_DOMAIN") {
            self.domain = v;
        }
        if let Some(v) = lookup("KSYUN_HTTP_PROXY") {
            self.http_proxy = Some(v);
        }
        if let Some(v) = lookup("KSYUN_USE_SSL") {
            self.use_ssl = parse_bool("KSYUN_USE_SSL", &v)?;
        }
        if let Some(v) = lookup("KSYUN_HTTP_KEEPALIVE") {
            self.http_keepalive = parse_bool("KSYUN_HTTP_KEEPALIVE", &v)?;
        }
        if let Some(v) = lookup("KSYUN_DRY_RUN") {
            self.dry_run = parse_bool("KSYUN_DRY_RUN", &v)?;
        }
        if let Some(v) = lookup("KSYUN_IGNORE_SERVICE") {
            self.ignore_service = parse_bool("KSYUN_IGNORE_SERVICE", &v)?;
        }
        if let Some(v) = lookup("KSYUN_MAX_RETRIES") {
            self.max_retries = v.parse().map_err(|_| ConfigError::Invalid {
                name: "KSYUN_MAX_RETRIES",
                value: v,
            })?;
        }
        if let Some(v) = lookup("KSYUN_TIMEOUT") {
            self.timeout = v.parse().map_err(|_| ConfigError::Invalid {
                name: "KSYUN_TIMEOUT",
                value: v,
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.is_empty() {
            return Err(ConfigError::Missing("access_key"));
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::Missing("secret_key"));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.domain.is_empty() || self.domain.contains("://") {
            return Err(ConfigError::Invalid {
                name: "domain",
                value: self.domain.clone(),
            });
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid {
                name: "timeout",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Region in API form (e.g., "ksyun.Region.cn_beijing_6" -> "cn-beijing-6")
    pub fn api_region(&self) -> String {
        normalize_region(&self.region)
    }

    /// Settings handed to the HTTP layer with every request
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            proxy: self.http_proxy.clone().filter(|p| !p.is_empty()),
            keepalive: self.http_keepalive,
            timeout: Duration::from_secs(self.timeout),
        }
    }

    pub fn endpoint(&self, service: &str) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        if self.ignore_service {
            format!("{}://{}", scheme, self.domain)
        } else {
            format!("{}://{}.{}", scheme, service, self.domain)
        }
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
