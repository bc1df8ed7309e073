/// Atalaya - connection supervision and topology detection for a document
/// store (MongoDB) and a cache store (Redis: standalone, replicated, cluster
/// or sentinel-managed)
///
/// Each backend is owned by a supervisor that connects, classifies the
/// deployment it finds, keeps watching the link and reconnects with bounded
/// backoff. [`Atalaya`] wires both supervisors to one configuration and
/// produces the composite status and liveness reports.
pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod utils;

use crate::backends::{CacheSupervisor, DocumentSupervisor};
use crate::config::Config;
use crate::core::{StatusRecord, Topology};
use crate::error::AtalayaResult;
use crate::health::{Aggregator, BackendSnapshot, CompositeStatus, HealthReport, MemoryInfo};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

pub use crate::error::AtalayaError;

/// Both backend supervisors plus the aggregator
pub struct Atalaya {
    config: Config,
    document: DocumentSupervisor,
    cache: CacheSupervisor,
    aggregator: Aggregator,
}

impl Atalaya {
    pub fn new(config: Config) -> Self {
        let document_required = config.document.as_ref().map_or(false, |d| d.required);
        let cache_required = config.cache.as_ref().map_or(false, |c| c.required);
        let aggregator = Aggregator::new(
            config.application.name.clone(),
            config.application.environment.clone(),
        );

        Self {
            document: DocumentSupervisor::new(document_required),
            cache: CacheSupervisor::new(cache_required),
            aggregator,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn document(&self) -> &DocumentSupervisor {
        &self.document
    }

    pub fn cache(&self) -> &CacheSupervisor {
        &self.cache
    }

    /// Connect both backends concurrently
    ///
    /// Backends that are unreachable keep retrying in the background; their
    /// errors are only returned when `startup.fail_fast` is set. Invalid
    /// configuration is always returned.
    pub async fn connect_all(&self) -> AtalayaResult<()> {
        let (document, cache) = futures::join!(
            self.document
                .connect(self.config.document.as_ref(), &self.config.application.name),
            self.cache.connect(self.config.cache.as_ref()),
        );

        for result in [document, cache] {
            match result {
                Ok(()) => {}
                Err(e) if e.is_recoverable() && !self.config.startup.fail_fast => {
                    warn!("{}; continuing, retries are scheduled", e);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Startup finished: {}", self.health().status);
        Ok(())
    }

    fn snapshots(&self) -> Vec<BackendSnapshot> {
        vec![
            BackendSnapshot::new(self.document.name(), self.document.is_required(), self.document.status()),
            BackendSnapshot::new(self.cache.name(), self.cache.is_required(), self.cache.status()),
        ]
    }

    /// Instantaneous liveness; reads snapshots only
    pub fn health(&self) -> HealthReport {
        self.aggregator.health(&self.snapshots())
    }

    /// Composite report; probes both backends concurrently
    pub async fn composite_status(&self) -> CompositeStatus {
        let (document_ping, cache_ping) = futures::join!(self.document.ping(), self.cache.ping());
        let memory = tokio::task::spawn_blocking(MemoryInfo::sample)
            .await
            .unwrap_or_else(|_| MemoryInfo::from_bytes(0, 0));

        let backends = self
            .snapshots()
            .into_iter()
            .zip([document_ping, cache_ping])
            .collect();
        self.aggregator.composite(backends, memory)
    }

    /// Wait up to `limit` for every configured backend to be connected and
    /// classified; returns whether that happened in time
    pub async fn wait_until_settled(&self, limit: Duration) -> bool {
        let settled = async {
            let document = settle(self.document.subscribe());
            let cache = settle(self.cache.subscribe());
            futures::join!(document, cache)
        };
        matches!(timeout(limit, settled).await, Ok((true, true)))
    }

    /// Disconnect both backends, giving up after `startup.shutdown_timeout_sec`
    ///
    /// Returns false when the deadline expired; the caller exits regardless.
    pub async fn disconnect_all(&self) -> bool {
        let limit = Duration::from_secs(self.config.startup.shutdown_timeout_sec);
        let disconnect = async {
            futures::join!(self.document.disconnect(), self.cache.disconnect());
        };

        match timeout(limit, disconnect).await {
            Ok(()) => {
                info!("All backends disconnected");
                true
            }
            Err(_) => {
                warn!("Shutdown did not finish within {}s, exiting anyway", limit.as_secs());
                false
            }
        }
    }
}

async fn settle(mut updates: watch::Receiver<StatusRecord>) -> bool {
    updates
        .wait_for(|s| !s.configured || (s.connected && s.topology != Topology::Unknown))
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, DocumentConfig};
    use crate::health::{CheckStatus, HealthStatus};

    #[tokio::test]
    async fn test_nothing_configured_is_healthy() {
        let atalaya = Atalaya::new(Config::default());
        tokio_test::assert_ok!(atalaya.connect_all().await);

        let health = atalaya.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks["document"], CheckStatus::Skipped);
        assert_eq!(health.checks["cache"], CheckStatus::Skipped);
        assert!(atalaya.wait_until_settled(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_invalid_cache_config_fails_startup() {
        let config = Config {
            cache: Some(CacheConfig::with_url("memcached://cache:11211")),
            ..Default::default()
        };
        let atalaya = Atalaya::new(config);
        let err = tokio_test::assert_err!(atalaya.connect_all().await);
        assert!(matches!(err, AtalayaError::Config(_)));
    }

    #[tokio::test]
    async fn test_required_document_without_uri_fails_check() {
        let config = Config {
            document: Some(DocumentConfig::new("")),
            ..Default::default()
        };
        tokio_test::assert_ok!(config.validate());

        let atalaya = Atalaya::new(config);
        tokio_test::assert_ok!(atalaya.connect_all().await);

        let status = atalaya.document().status();
        assert!(!status.configured);
        assert!(!status.connected);

        let health = atalaya.health();
        assert_eq!(health.checks["document"], CheckStatus::Fail);
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_required_flags_follow_config() {
        let mut cache = CacheConfig::with_url("redis://127.0.0.1:6379");
        cache.required = true;
        let config = Config {
            document: Some(DocumentConfig::new("mongodb://127.0.0.1:27017")),
            cache: Some(cache),
            ..Default::default()
        };

        let atalaya = Atalaya::new(config);
        assert!(atalaya.document().is_required());
        assert!(atalaya.cache().is_required());
    }

    #[tokio::test]
    async fn test_composite_status_without_backends() {
        let atalaya = Atalaya::new(Config::default());
        atalaya.connect_all().await.unwrap();

        let composite = atalaya.composite_status().await;
        assert_eq!(composite.application.name, "atalaya");
        assert!(!composite.services["document"].ping);
        assert!(!composite.services["cache"].status.configured);
    }

    #[tokio::test]
    async fn test_disconnect_all_is_bounded() {
        let atalaya = Atalaya::new(Config::default());
        atalaya.connect_all().await.unwrap();
        assert!(atalaya.disconnect_all().await);
    }
}
