// Configuration management module
// This file handles loading and validating the instrumentation settings
// from PROMETHEUS_* environment variables
//
// Numan Thabit 2025 Nov

use crate::errors::MetricsError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

const ENV_PREFIX: &str = "PROMETHEUS";
const BUCKET_KEYS: [&str; 3] = ["routes_buckets", "sql_buckets", "http_client_buckets"];

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Prefix for every namespaced metric, e.g. `app_response_time_seconds`
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Serve the text exposition route
    #[serde(default = "default_true")]
    pub metrics_route_enabled: bool,
    /// Path of the exposition route (leading slash optional)
    #[serde(default = "default_metrics_route_path")]
    pub metrics_route_path: String,
    /// Storage driver for the sink; only `memory` is available in-process
    #[serde(default = "default_storage_adapter")]
    pub storage_adapter: String,
    /// Fingerprint SQL text instead of reporting `[omitted]`
    #[serde(default)]
    pub collect_full_sql_query: bool,
    /// Attach the `service_caller` label to SQL observations
    #[serde(default, alias = "sql_collect_service_caller")]
    pub collect_sql_service_caller: bool,
    /// Path prefix a stack frame must start with to count as the service caller
    #[serde(default = "default_service_namespace")]
    pub sql_service_namespace: String,
    /// Bucket overrides, `None` keeps the sink defaults
    #[serde(default)]
    pub routes_buckets: Option<Vec<f64>>,
    #[serde(default)]
    pub sql_buckets: Option<Vec<f64>>,
    #[serde(default)]
    pub http_client_buckets: Option<Vec<f64>>,
    /// Static labels attached to every execution metric
    #[serde(default)]
    pub standard_metrics: StandardMetrics,
    #[serde(default)]
    pub flush: FlushSettings,
    /// Pending observations kept before new ones are dropped
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Bind address of the demo server
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StandardMetrics {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
}

impl StandardMetrics {
    /// Nested values win over the flat ones.
    fn fill_from(&mut self, flat: FlatStandardMetrics) {
        self.owner = self.owner.take().or(flat.standard_metrics_owner);
        self.domain = self.domain.take().or(flat.standard_metrics_domain);
        self.system = self.system.take().or(flat.standard_metrics_system);
    }
}

/// `PROMETHEUS_STANDARD_METRICS_OWNER` and friends, the single underscore
/// spelling accepted next to `PROMETHEUS_STANDARD_METRICS__OWNER`
#[derive(Debug, Default, Deserialize)]
struct FlatStandardMetrics {
    #[serde(default)]
    standard_metrics_owner: Option<String>,
    #[serde(default)]
    standard_metrics_domain: Option<String>,
    #[serde(default)]
    standard_metrics_system: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlushSettings {
    /// Maximum observations forwarded in one pass
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Time budget of one pass in milliseconds
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    /// Background flush period in seconds, 0 disables it
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            max_duration_ms: default_max_duration_ms(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl FlushSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            metrics_route_enabled: true,
            metrics_route_path: default_metrics_route_path(),
            storage_adapter: default_storage_adapter(),
            collect_full_sql_query: false,
            collect_sql_service_caller: false,
            sql_service_namespace: default_service_namespace(),
            routes_buckets: None,
            sql_buckets: None,
            http_client_buckets: None,
            standard_metrics: StandardMetrics::default(),
            flush: FlushSettings::default(),
            buffer_capacity: default_buffer_capacity(),
            listen_address: default_listen_address(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, MetricsError> {
        Self::load_from(Self::environment())
    }

    /// Load from an explicit environment source, mostly useful for tests that
    /// must not touch the process environment.
    pub fn load_from(env: config::Environment) -> Result<Self, MetricsError> {
        let cfg = config::Config::builder().add_source(env).build()?;
        let flat: FlatStandardMetrics = cfg.clone().try_deserialize()?;
        let mut app: AppConfig = cfg.try_deserialize()?;
        app.standard_metrics.fill_from(flat);
        app.validate()?;
        Ok(app)
    }

    /// The `PROMETHEUS_` environment source: `__` nests keys, bucket lists are
    /// comma separated. `SQL_COLLECT_SERVICE_CALLER` is read as an alias of
    /// `COLLECT_SQL_SERVICE_CALLER`; setting both is an error.
    pub fn environment() -> config::Environment {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        BUCKET_KEYS
            .iter()
            .fold(env, |env, key| env.with_list_parse_key(key))
    }

    pub fn validate(&self) -> Result<(), MetricsError> {
        for (name, buckets) in [
            ("routes_buckets", &self.routes_buckets),
            ("sql_buckets", &self.sql_buckets),
            ("http_client_buckets", &self.http_client_buckets),
        ] {
            if let Some(buckets) = buckets {
                validate_buckets(name, buckets)?;
            }
        }
        if self.flush.max_batch == 0 {
            return Err(MetricsError::Config(
                "flush.max_batch must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(MetricsError::Config(
                "buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(MetricsError::Config("namespace must not be empty".to_string()));
        }
        Ok(())
    }

    /// Exposition path with exactly one leading slash.
    pub fn metrics_route(&self) -> String {
        format!("/{}", self.metrics_route_path.trim_start_matches('/'))
    }
}

pub fn validate_buckets(name: &str, buckets: &[f64]) -> Result<(), MetricsError> {
    let invalid = |reason: &str| MetricsError::InvalidBuckets {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if buckets.is_empty() {
        return Err(invalid("at least one bucket is required"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("bucket bounds must be finite"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("bucket bounds must be strictly increasing"));
    }
    Ok(())
}

fn default_namespace() -> String {
    "app".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_route_path() -> String {
    "metrics".to_string()
}

fn default_storage_adapter() -> String {
    "memory".to_string()
}

fn default_service_namespace() -> String {
    "services".to_string()
}

fn default_max_batch() -> usize {
    1000
}

fn default_max_duration_ms() -> u64 {
    50
}

fn default_interval_secs() -> u64 {
    10
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
