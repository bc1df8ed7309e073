/// Configuration management for atalaya

use crate::core::{LinkSettings, RetryPolicy};
use crate::utils::redact_credentials;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub use crate::error::ConfigError;

/// Main atalaya configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Application identity reported in the composite status
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Document store backend; absent means not configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentConfig>,
    /// Cache store backend; absent means not configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Startup and shutdown behaviour
    #[serde(default)]
    pub startup: StartupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub environment: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "atalaya".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Document store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Connection string, `mongodb://` or `mongodb+srv://`
    pub uri: String,
    /// Whether the service is degraded without this backend
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl DocumentConfig {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        Self {
            uri: uri.into(),
            required: true,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        link_settings(&self.retry, &self.timeouts)
    }
}

/// Cache store connection settings
///
/// Exactly one way of reaching the store is used, in this order: cluster
/// node list, sentinel hosts, single endpoint URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Single endpoint, `redis://[user:password@]host:port[/db]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cluster seed nodes (`host:port`)
    #[serde(default)]
    pub cluster_nodes: Vec<String>,
    /// Sentinel hosts (`host:port`)
    #[serde(default)]
    pub sentinels: Vec<String>,
    /// Logical primary name monitored by the sentinels
    #[serde(default = "default_sentinel_master")]
    pub sentinel_master: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub database: u32,
    /// Whether the service is degraded without this backend
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            cluster_nodes: Vec::new(),
            sentinels: Vec::new(),
            sentinel_master: default_sentinel_master(),
            username: None,
            password: None,
            database: 0,
            required: false,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// True when no way of reaching the store is configured
    pub fn is_empty(&self) -> bool {
        self.cluster_nodes.is_empty()
            && self.sentinels.is_empty()
            && self.url.as_deref().map_or(true, |u| u.trim().is_empty())
    }

    pub fn link_settings(&self) -> LinkSettings {
        link_settings(&self.retry, &self.timeouts)
    }
}

/// Reconnection budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 2000,
            cap_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.cap_delay_ms),
        )
    }
}

/// Per-operation time limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per node; an attempt that walks several seeds or sentinels gets one slot each
    pub connect_ms: u64,
    pub probe_ms: u64,
    pub classify_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5000,
            probe_ms: 3000,
            classify_ms: 10_000,
            heartbeat_interval_ms: 10_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Startup and shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Abort startup when a backend cannot be reached on the first attempt
    pub fail_fast: bool,
    /// Hard limit for disconnecting all backends on shutdown
    pub shutdown_timeout_sec: u64,
    /// How often `run` logs the health summary
    pub report_interval_sec: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            shutdown_timeout_sec: 10,
            report_interval_sec: 30,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sentinel_master() -> String {
    "mymaster".to_string()
}

fn link_settings(retry: &RetryConfig, timeouts: &TimeoutConfig) -> LinkSettings {
    LinkSettings {
        retry: retry.policy(),
        connect_timeout: Duration::from_millis(timeouts.connect_ms),
        probe_timeout: Duration::from_millis(timeouts.probe_ms),
        classify_timeout: Duration::from_millis(timeouts.classify_ms),
        heartbeat_interval: Duration::from_millis(timeouts.heartbeat_interval_ms),
    }
}

/// Environment variables that override file settings
pub const ENV_DOCUMENT_URI: &str = "ATALAYA_DOCUMENT_URI";
pub const ENV_CACHE_URL: &str = "ATALAYA_CACHE_URL";
pub const ENV_CACHE_CLUSTER_NODES: &str = "ATALAYA_CACHE_CLUSTER_NODES";
pub const ENV_CACHE_SENTINELS: &str = "ATALAYA_CACHE_SENTINELS";
pub const ENV_CACHE_SENTINEL_MASTER: &str = "ATALAYA_CACHE_SENTINEL_MASTER";
pub const ENV_LOG_LEVEL: &str = "ATALAYA_LOG_LEVEL";

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Apply `ATALAYA_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(ENV_DOCUMENT_URI).filter(|v| !v.trim().is_empty()) {
            match self.document.as_mut() {
                Some(document) => document.uri = uri,
                None => self.document = Some(DocumentConfig::new(uri)),
            }
        }

        let url = lookup(ENV_CACHE_URL).filter(|v| !v.trim().is_empty());
        let cluster_nodes = lookup(ENV_CACHE_CLUSTER_NODES).map(|v| split_list(&v));
        let sentinels = lookup(ENV_CACHE_SENTINELS).map(|v| split_list(&v));
        let sentinel_master = lookup(ENV_CACHE_SENTINEL_MASTER).filter(|v| !v.trim().is_empty());

        if url.is_some() || cluster_nodes.is_some() || sentinels.is_some() || sentinel_master.is_some() {
            let cache = self.cache.get_or_insert_with(CacheConfig::default);
            if let Some(url) = url {
                cache.url = Some(url);
            }
            if let Some(nodes) = cluster_nodes {
                cache.cluster_nodes = nodes;
            }
            if let Some(hosts) = sentinels {
                cache.sentinels = hosts;
            }
            if let Some(master) = sentinel_master {
                cache.sentinel_master = master;
            }
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level.to_lowercase();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "application name cannot be empty".to_string(),
            ));
        }

        if let Some(document) = &self.document {
            // A blank uri leaves the document store unconfigured
            let uri = document.uri.trim();
            if !uri.is_empty() && !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid document uri '{}': must start with mongodb:// or mongodb+srv://",
                    redact_credentials(uri)
                )));
            }
            validate_link("document", &document.retry, &document.timeouts)?;
        }

        if let Some(cache) = &self.cache {
            if let Some(url) = cache.url.as_deref().filter(|u| !u.trim().is_empty()) {
                let invalid = |reason: String| {
                    ConfigError::ValidationError(format!("Invalid cache url '{}': {}", redact_credentials(url), reason))
                };
                let parsed = url::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
                if parsed.scheme() != "redis" {
                    return Err(invalid("only redis:// is supported".to_string()));
                }
                if parsed.host_str().is_none() {
                    return Err(invalid("missing host".to_string()));
                }
            }

            for node in cache.cluster_nodes.iter().chain(cache.sentinels.iter()) {
                validate_host_port(node)?;
            }

            if !cache.sentinels.is_empty() && cache.sentinel_master.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "sentinel_master cannot be empty when sentinels are configured".to_string(),
                ));
            }

            validate_link("cache", &cache.retry, &cache.timeouts)?;
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        if self.startup.shutdown_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "shutdown_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.startup.report_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "report_interval_sec must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let config = Self::example(mode)?;
        config.save_to_file(path)
    }

    /// Example configuration for a deployment mode
    pub fn example(mode: &str) -> Result<Self, ConfigError> {
        let config = match mode {
            "standalone" => Config {
                document: Some(DocumentConfig::new("mongodb://127.0.0.1:27017")),
                cache: Some(CacheConfig::with_url("redis://127.0.0.1:6379")),
                ..Default::default()
            },
            "replicated" => Config {
                document: Some(DocumentConfig::new(
                    "mongodb://10.0.1.10:27017,10.0.1.11:27017,10.0.1.12:27017/?replicaSet=rs0",
                )),
                cache: Some(CacheConfig::with_url("redis://10.0.1.20:6379")),
                ..Default::default()
            },
            "cluster" => Config {
                document: Some(DocumentConfig::new("mongodb://10.0.1.10:27017")),
                cache: Some(CacheConfig {
                    cluster_nodes: vec![
                        "10.0.1.20:6379".to_string(),
                        "10.0.1.21:6379".to_string(),
                        "10.0.1.22:6379".to_string(),
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            },
            "sentinel" => Config {
                document: Some(DocumentConfig::new("mongodb://10.0.1.10:27017")),
                cache: Some(CacheConfig {
                    sentinels: vec![
                        "10.0.1.30:26379".to_string(),
                        "10.0.1.31:26379".to_string(),
                        "10.0.1.32:26379".to_string(),
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Mode must be 'standalone', 'replicated', 'cluster' or 'sentinel'".to_string(),
            )),
        };

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_host_port(node: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::ValidationError(format!("Invalid node '{}': must be host:port", node));
    let (host, port) = node.rsplit_once(':').ok_or_else(invalid)?;
    if host.trim().is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

fn validate_link(name: &str, retry: &RetryConfig, timeouts: &TimeoutConfig) -> Result<(), ConfigError> {
    if retry.base_delay_ms == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{name} retry base_delay_ms must be greater than 0"
        )));
    }
    if retry.cap_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "{name} retry cap_delay_ms must be at least base_delay_ms"
        )));
    }
    if timeouts.connect_ms == 0
        || timeouts.probe_ms == 0
        || timeouts.classify_ms == 0
        || timeouts.heartbeat_interval_ms == 0
    {
        return Err(ConfigError::ValidationError(format!(
            "{name} timeouts must be greater than 0"
        )));
    }
    if timeouts.probe_ms >= timeouts.heartbeat_interval_ms {
        return Err(ConfigError::ValidationError(format!(
            "{name} probe_ms must be less than heartbeat_interval_ms"
        )));
    }
    Ok(())
}
