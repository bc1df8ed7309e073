/// Cache store backend (RESP protocol)
pub mod classify;
pub mod connection;
pub mod info;
pub mod resp;
pub mod transport;

pub use classify::{CacheDiagnostics, CacheMode};
pub use transport::{CacheEndpoint, CacheTarget, CacheTransport};

use crate::config::CacheConfig;
use crate::core::Supervisor;
use crate::error::AtalayaResult;
use std::ops::Deref;

/// Supervisor of the cache store connection
pub struct CacheSupervisor {
    inner: Supervisor<CacheTransport>,
}

impl CacheSupervisor {
    pub fn new(required: bool) -> Self {
        Self {
            inner: Supervisor::new("cache", required),
        }
    }

    /// Connect using `config`
    ///
    /// Absent or empty configuration is reported as "not configured" and is
    /// not an error. A failed first attempt returns a recoverable error with
    /// the retry already scheduled.
    pub async fn connect(&self, config: Option<&CacheConfig>) -> AtalayaResult<()> {
        let endpoint = match config.map(CacheEndpoint::from_config).transpose() {
            Ok(endpoint) => endpoint.flatten(),
            Err(e) => {
                self.inner.mark_misconfigured(&e.to_string());
                return Err(e.into());
            }
        };

        let (Some(config), Some(endpoint)) = (config, endpoint) else {
            self.inner.mark_not_configured();
            return Ok(());
        };

        let settings = config.link_settings();
        let transport = CacheTransport::new(endpoint, settings.connect_timeout);
        self.inner.start(transport, settings).await
    }
}

impl Deref for CacheSupervisor {
    type Target = Supervisor<CacheTransport>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
