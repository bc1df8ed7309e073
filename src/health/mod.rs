/// Composite status and liveness over the backend status records
///
/// Everything here works on snapshots; nothing in this module talks to a
/// backend or mutates a status record.
use crate::core::StatusRecord;
use crate::utils::{format_bytes, format_duration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Outcome of one backend check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

/// Overall liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
        }
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Status of one backend as seen by the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSnapshot {
    pub name: String,
    pub required: bool,
    pub status: StatusRecord,
}

impl BackendSnapshot {
    pub fn new<S: Into<String>>(name: S, required: bool, status: StatusRecord) -> Self {
        Self {
            name: name.into(),
            required,
            status,
        }
    }

    /// Unconfigured optional backends are skipped; a required backend must
    /// be connected even when it has no configuration.
    pub fn check(&self) -> CheckStatus {
        if self.status.connected {
            CheckStatus::Pass
        } else if !self.status.configured && !self.required {
            CheckStatus::Skipped
        } else {
            CheckStatus::Fail
        }
    }
}

/// Liveness report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckStatus>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Healthy iff no check failed
    pub fn evaluate(backends: &[BackendSnapshot], now: DateTime<Utc>) -> Self {
        let checks: BTreeMap<String, CheckStatus> = backends
            .iter()
            .map(|backend| (backend.name.clone(), backend.check()))
            .collect();

        let status = if checks.values().any(|c| *c == CheckStatus::Fail) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            checks,
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub environment: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeInfo {
    pub started_at: DateTime<Utc>,
    pub seconds: u64,
    pub human: String,
}

/// Resident and virtual memory of this process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub rss: String,
}

impl MemoryInfo {
    pub fn from_bytes(rss_bytes: u64, virtual_bytes: u64) -> Self {
        Self {
            rss_bytes,
            virtual_bytes,
            rss: format_bytes(rss_bytes),
        }
    }

    /// Sample the current process; zeroes when the platform does not report it
    pub fn sample() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system.process(pid) {
            Some(process) => Self::from_bytes(process.memory(), process.virtual_memory()),
            None => Self::from_bytes(0, 0),
        }
    }
}

/// One backend in the composite status: its record plus a live probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub status: StatusRecord,
    pub required: bool,
    pub ping: bool,
}

/// Composite status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeStatus {
    pub application: ApplicationInfo,
    pub uptime: UptimeInfo,
    pub services: BTreeMap<String, ServiceStatus>,
    pub memory: MemoryInfo,
    pub timestamp: DateTime<Utc>,
}

/// Builds reports from snapshots; holds only process identity
#[derive(Debug, Clone)]
pub struct Aggregator {
    application: ApplicationInfo,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Aggregator {
    pub fn new<N: Into<String>, E: Into<String>>(name: N, environment: E) -> Self {
        Self {
            application: ApplicationInfo {
                name: name.into(),
                environment: environment.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn application(&self) -> &ApplicationInfo {
        &self.application
    }

    pub fn uptime(&self) -> UptimeInfo {
        let elapsed = self.started.elapsed();
        UptimeInfo {
            started_at: self.started_at,
            seconds: elapsed.as_secs(),
            human: format_duration(elapsed),
        }
    }

    pub fn health(&self, backends: &[BackendSnapshot]) -> HealthReport {
        HealthReport::evaluate(backends, Utc::now())
    }

    /// Merge snapshots, their probe results and process metrics
    pub fn composite(&self, backends: Vec<(BackendSnapshot, bool)>, memory: MemoryInfo) -> CompositeStatus {
        let services = backends
            .into_iter()
            .map(|(backend, ping)| {
                (
                    backend.name,
                    ServiceStatus {
                        status: backend.status,
                        required: backend.required,
                        ping,
                    },
                )
            })
            .collect();

        CompositeStatus {
            application: self.application.clone(),
            uptime: self.uptime(),
            services,
            memory,
            timestamp: Utc::now(),
        }
    }
}
