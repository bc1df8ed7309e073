/// Connection supervisor: owns one backend link and its status record
///
/// Each supervisor runs a single driver task that owns the [`Machine`]. Every
/// transport interaction (connection attempts, classification, heartbeats,
/// retry timers) runs in a helper task that reports back by sending a
/// [`LinkEvent`]; only the driver mutates state. Readers get snapshots through
/// a `watch` channel, so [`Supervisor::status`] never waits on I/O.
use super::machine::{Effect, LinkEvent, LinkState, Machine};
use super::retry::RetryPolicy;
use super::{Classification, StatusRecord};
use crate::error::{AtalayaError, AtalayaResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A protocol-capable connection to one backend
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Endpoint description for logs
    fn describe(&self) -> String;

    /// Open the connection and complete the handshake
    async fn open(&self) -> AtalayaResult<()>;

    /// Deadline for one whole `open`, given the per-node connect timeout
    fn attempt_timeout(&self, per_node: Duration) -> Duration {
        per_node
    }

    /// Lightweight liveness probe on the current connection
    async fn ping(&self) -> AtalayaResult<()>;

    /// Determine the deployment shape of the connected backend
    async fn classify(&self) -> Classification;

    /// Protocol-level graceful close
    async fn quit(&self) -> AtalayaResult<()>;

    /// Drop the connection without talking to the server
    fn force_close(&self);

    /// Whether the transport keeps reconnecting by itself after failures
    fn reconnects_in_background(&self) -> bool {
        false
    }
}

/// Timing and retry settings of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub classify_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            classify_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

struct Link<T: Transport> {
    transport: Arc<T>,
    settings: LinkSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Lifecycle owner of one backend connection
pub struct Supervisor<T: Transport> {
    name: String,
    required: bool,
    status: Arc<watch::Sender<StatusRecord>>,
    link: OnceLock<Link<T>>,
}

impl<T: Transport> Supervisor<T> {
    pub fn new<S: Into<String>>(name: S, required: bool) -> Self {
        let (status, _) = watch::channel(StatusRecord::new(&RetryPolicy::default(), Utc::now()));
        Self {
            name: name.into(),
            required,
            status: Arc::new(status),
            link: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Snapshot of the status record
    pub fn status(&self) -> StatusRecord {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<StatusRecord> {
        self.status.subscribe()
    }

    /// Record that this backend has no configuration
    pub fn mark_not_configured(&self) {
        info!("Backend {} is not configured", self.name);
        self.status.send_replace(StatusRecord::not_configured(Utc::now()));
    }

    /// Record a configuration the backend cannot be started with
    pub fn mark_misconfigured(&self, reason: &str) {
        warn!("Backend {} has an invalid configuration: {}", self.name, reason);
        self.status.send_modify(|status| {
            status.state = LinkState::Error;
            status.message = format!("invalid configuration: {}", reason);
            status.last_error = Some(reason.to_string());
            status.touch(Utc::now());
        });
    }

    /// Start supervising `transport` and wait for the first attempt to settle
    ///
    /// A failed first attempt returns a recoverable [`AtalayaError::Unavailable`];
    /// the retry has already been scheduled by then.
    pub async fn start(&self, transport: T, settings: LinkSettings) -> AtalayaResult<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(transport);

        let link = Link {
            transport: Arc::clone(&transport),
            settings,
            events: events_tx.clone(),
            shutdown: shutdown_tx,
            driver: Mutex::new(None),
        };
        if self.link.set(link).is_err() {
            return Err(AtalayaError::internal(format!(
                "backend {} is already supervised",
                self.name
            )));
        }

        info!("Supervising backend {} at {}", self.name, transport.describe());
        let attempt_limit = transport.attempt_timeout(settings.connect_timeout);

        let machine = Machine::new(settings.retry, Utc::now());
        self.status.send_replace(machine.status().clone());

        let driver = Driver {
            name: self.name.clone(),
            machine,
            transport,
            settings,
            events: events_tx.clone(),
            status: Arc::clone(&self.status),
            shutdown: shutdown_rx,
            heartbeat: None,
            watcher: None,
        };
        let handle = tokio::spawn(driver.run(events_rx));
        if let Some(link) = self.link.get() {
            if let Ok(mut slot) = link.driver.lock() {
                *slot = Some(handle);
            }
        }

        let mut updates = self.status.subscribe();
        events_tx
            .send(LinkEvent::Start)
            .map_err(|_| AtalayaError::internal("supervisor driver stopped"))?;

        let settle = attempt_limit + Duration::from_secs(1);
        let connected = match timeout(
            settle,
            updates.wait_for(|s| s.connection_attempts >= 1 && s.state != LinkState::Connecting),
        )
        .await
        {
            Ok(Ok(status)) => status.connected,
            _ => false,
        };

        if connected {
            Ok(())
        } else {
            let status = self.status();
            Err(AtalayaError::unavailable(
                self.name.clone(),
                status.last_error.unwrap_or(status.message),
            ))
        }
    }

    /// Feed an externally observed transport event into the state machine
    pub fn inject(&self, event: LinkEvent) -> bool {
        match self.link.get() {
            Some(link) => link.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Liveness probe; false when not connected, on error or on timeout
    pub async fn ping(&self) -> bool {
        let Some(link) = self.link.get() else {
            return false;
        };
        let connected = self.status.borrow().connected;
        if !connected {
            return false;
        }

        match timeout(link.settings.probe_timeout, link.transport.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Ping to backend {} failed: {}", self.name, e);
                false
            }
            Err(_) => {
                debug!("Ping to backend {} timed out", self.name);
                false
            }
        }
    }

    /// Stop supervising and close the connection; never fails
    pub async fn disconnect(&self) {
        let Some(link) = self.link.get() else {
            return;
        };

        link.shutdown.send_replace(true);
        let driver = link.driver.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = driver {
            if let Err(e) = handle.await {
                warn!("Driver of backend {} ended abnormally: {}", self.name, e);
            }
        }

        match timeout(link.settings.probe_timeout, link.transport.quit()).await {
            Ok(Ok(())) => info!("Closed backend {}", self.name),
            Ok(Err(e)) => {
                warn!("Graceful close of backend {} failed, forcing: {}", self.name, e);
                link.transport.force_close();
            }
            Err(_) => {
                warn!("Graceful close of backend {} timed out, forcing", self.name);
                link.transport.force_close();
            }
        }

        self.status.send_modify(|status| status.mark_shutdown(Utc::now()));
    }
}

/// Event loop owning the machine of one link
struct Driver<T: Transport> {
    name: String,
    machine: Machine,
    transport: Arc<T>,
    settings: LinkSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
    status: Arc<watch::Sender<StatusRecord>>,
    shutdown: watch::Receiver<bool>,
    heartbeat: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = self.shutdown.changed() => break,
            };

            let before = self.machine.state();
            let effects = self.machine.apply(event, Utc::now());
            let after = self.machine.state();
            if before != after {
                info!("Backend {}: {} -> {}", self.name, before, after);
            }
            self.status.send_replace(self.machine.status().clone());

            for effect in effects {
                self.run_effect(effect);
            }
        }

        self.stop_heartbeat();
        self.stop_watcher();
        debug!("Driver of backend {} stopped", self.name);
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Open => self.spawn_attempt(),
            Effect::Classify { session } => self.spawn_classifier(session),
            Effect::Monitor { session } => {
                self.stop_watcher();
                self.stop_heartbeat();
                self.heartbeat = Some(self.spawn_heartbeat(session));
            }
            Effect::Unmonitor => self.stop_heartbeat(),
            Effect::ScheduleRetry {
                attempt,
                delay,
                generation,
            } => {
                info!(
                    "Backend {}: reconnect attempt {} in {}ms",
                    self.name,
                    attempt,
                    delay.as_millis()
                );
                self.spawn_retry_timer(attempt, generation, delay);
            }
            Effect::GiveUp => {
                warn!(
                    "Backend {}: retry budget of {} exhausted",
                    self.name, self.settings.retry.max_retries
                );
                if self.transport.reconnects_in_background() {
                    self.stop_watcher();
                    self.watcher = Some(self.spawn_watcher());
                }
            }
        }
    }

    fn spawn_attempt(&self) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let limit = transport.attempt_timeout(self.settings.connect_timeout);
        let name = self.name.clone();

        tokio::spawn(async move {
            let event = match timeout(limit, transport.open()).await {
                Ok(Ok(())) => LinkEvent::Ready,
                Ok(Err(e)) => {
                    warn!("Backend {} connection attempt failed: {}", name, e);
                    LinkEvent::Error(e.to_string())
                }
                Err(_) => {
                    warn!("Backend {} connection attempt timed out", name);
                    LinkEvent::Error(format!("connect timed out after {}ms", limit.as_millis()))
                }
            };
            let _ = events.send(event);
        });
    }

    fn spawn_classifier(&self, session: u64) {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let limit = self.settings.classify_timeout;
        let name = self.name.clone();

        tokio::spawn(async move {
            let classification = match timeout(limit, transport.classify()).await {
                Ok(classification) => classification,
                Err(_) => {
                    warn!("Backend {} classification timed out", name);
                    Classification::unknown()
                }
            };
            debug!(
                "Backend {} classified as {} ({} members)",
                name,
                classification.topology,
                classification.members.len()
            );
            let _ = events.send(LinkEvent::Classified {
                session,
                classification,
            });
        });
    }

    fn spawn_heartbeat(&self, session: u64) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let mut shutdown = self.shutdown.clone();
        let every = self.settings.heartbeat_interval;
        let limit = self.settings.probe_timeout;

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                let reason = match timeout(limit, transport.ping()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "heartbeat timed out".to_string(),
                };
                let _ = events.send(LinkEvent::Lost { session, reason });
                break;
            }
        })
    }

    fn spawn_retry_timer(&self, attempt: u32, generation: u64, delay: Duration) {
        let events = self.events.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    let _ = events.send(LinkEvent::RetryDue { attempt, generation });
                }
                _ = shutdown.changed() => {}
            }
        });
    }

    /// Probe a transport that reconnects by itself until it answers again
    fn spawn_watcher(&self) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let mut shutdown = self.shutdown.clone();
        let every = self.settings.retry.cap_delay;
        let limit = self.settings.probe_timeout;
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(every) => {}
                    _ = shutdown.changed() => break,
                }

                if let Ok(Ok(())) = timeout(limit, transport.ping()).await {
                    info!("Backend {} answered again after background reconnection", name);
                    let _ = events.send(LinkEvent::Connecting);
                    let _ = events.send(LinkEvent::Ready);
                    break;
                }
            }
        })
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    fn stop_watcher(&mut self) {
        if let Some(handle) = self.watcher.take() {
            handle.abort();
        }
    }
}
