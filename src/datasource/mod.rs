//! Datasource adapters - external APIs surfaced as tools
//!
//! A datasource exposes a stable name and a set of callable methods. The
//! tool registry reflects over the advertised method specs to generate
//! tool catalog entries; methods sharing a tool name become one unified
//! action-dispatched tool (see `tools::ToolRegistry::register_source`).

mod coingecko;
mod jupiter;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{Error, Result};

pub use coingecko::CoinGeckoSource;
pub use jupiter::JupiterSource;

/// Declared parameter of a datasource method
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// JSON Schema type ("string", "number", "integer", "boolean", ...)
    pub param_type: String,
    /// Human-readable description
    pub description: String,
    /// Whether the parameter is required when the method is called directly
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        ParamSpec {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        ParamSpec {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// A datasource method advertised for tool generation
#[derive(Debug, Clone)]
pub struct MethodSpec {
    /// Method name, used as the `action` discriminator in unified tools
    pub method: String,
    /// Tool name this method registers under
    pub tool_name: String,
    /// Method description
    pub description: String,
    /// Declared parameters
    pub params: Vec<ParamSpec>,
    /// Whether results represent user actions
    pub user_action: bool,
}

/// A datasource: one or more callable methods behind a stable name
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable datasource name
    fn name(&self) -> &str;

    /// Methods advertised for tool generation
    fn methods(&self) -> Vec<MethodSpec>;

    /// Invoke a method by name with a JSON argument object
    async fn call(&self, method: &str, args: Value) -> Result<Value>;

    /// Check whether the datasource is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Configuration for an HTTP-backed datasource
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    /// Datasource name
    pub name: String,
    /// Base URL for REST requests
    pub rest_url: String,
    /// Headers attached to every request
    pub headers: HashMap<String, String>,
    /// Query parameters attached to every request
    pub params: HashMap<String, String>,
    /// Request timeout
    pub timeout: Duration,
}

impl DataSourceConfig {
    pub fn new(name: &str, rest_url: &str) -> Self {
        DataSourceConfig {
            name: name.to_string(),
            rest_url: rest_url.to_string(),
            headers: HashMap::new(),
            params: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

/// Shared HTTP plumbing for REST datasources.
///
/// Request failures come back as JSON error objects naming the source, so
/// the model sees a structured error rather than the turn aborting.
pub struct HttpDataSource {
    config: DataSourceConfig,
    client: reqwest::Client,
}

impl HttpDataSource {
    pub fn new(config: DataSourceConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {}: {}", key, e)))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid header value for {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(HttpDataSource { config, client })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// GET an endpoint relative to the configured base URL
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Value {
        let url = format!(
            "{}/{}",
            self.config.rest_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );

        let mut query: Vec<(&str, String)> = self
            .config
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        query.extend(params.iter().cloned());

        let response = match self.client.get(&url).query(&query).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("GET request failed for {}: {}", self.config.name, e);
                return json!({"error": e.to_string(), "source": self.config.name});
            }
        };

        if let Err(e) = response.error_for_status_ref() {
            error!("GET request failed for {}: {}", self.config.name, e);
            return json!({"error": e.to_string(), "source": self.config.name});
        }

        match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => json!({"error": e.to_string(), "source": self.config.name}),
        }
    }

    /// Probe the base URL for liveness
    pub async fn reachable(&self, endpoint: &str) -> bool {
        let url = format!(
            "{}/{}",
            self.config.rest_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Error value for a method the datasource does not implement
pub(crate) fn unknown_method(source: &str, method: &str) -> Value {
    json!({"error": format!("unknown method: {}", method), "source": source})
}

/// Extract a required string argument or produce a protocol error value
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> std::result::Result<&'a str, Value> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| json!({"error": format!("bad args: missing {}", key)}))
}
