/// Core abstractions shared between the document and cache backends
pub mod machine;
pub mod retry;
pub mod supervisor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use machine::{Effect, LinkEvent, LinkState, Machine};
pub use retry::{RetryDecision, RetryPolicy, RetrySnapshot, RetryState};
pub use supervisor::{LinkSettings, Supervisor, Transport};

/// Deployment shape of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    Standalone,
    Replicated,
    Sharded,
    Clustered,
    SentinelManaged,
    #[default]
    Unknown,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Standalone => "standalone",
            Topology::Replicated => "replicated",
            Topology::Sharded => "sharded",
            Topology::Clustered => "clustered",
            Topology::SentinelManaged => "sentinel-managed",
            Topology::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Health of one member as reported by the backend itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberHealth {
    Up,
    Down,
    Unknown,
}

/// One node of a replica set, shard list, cluster or sentinel view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub address: String,
    pub role: String,
    pub health: MemberHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
}

impl MemberInfo {
    pub fn new<A: Into<String>, R: Into<String>>(address: A, role: R, health: MemberHealth) -> Self {
        Self {
            address: address.into(),
            role: role.into(),
            health,
            name: None,
            lag_secs: None,
            uptime_secs: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_lag(mut self, lag_secs: Option<i64>) -> Self {
        self.lag_secs = lag_secs;
        self
    }

    pub fn with_uptime(mut self, uptime_secs: Option<i64>) -> Self {
        self.uptime_secs = uptime_secs;
        self
    }
}

/// Result of one classifier run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub topology: Topology,
    pub role: Option<String>,
    pub members: Vec<MemberInfo>,
    /// Server version of the node we are connected to
    pub version: Option<String>,
    pub uptime_secs: Option<i64>,
}

impl Classification {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            role: None,
            members: Vec::new(),
            version: None,
            uptime_secs: None,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_members(mut self, members: Vec<MemberInfo>) -> Self {
        self.members = members;
        self
    }

    pub fn with_server(mut self, version: Option<String>, uptime_secs: Option<i64>) -> Self {
        self.version = version;
        self.uptime_secs = uptime_secs;
        self
    }
}

/// Status record of one backend
///
/// Only the owning supervisor's driver task mutates a record; everyone else
/// works on clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub configured: bool,
    pub connected: bool,
    pub state: LinkState,
    pub message: String,
    pub last_checked: DateTime<Utc>,
    /// Real connection attempts (initial, scheduled and background)
    pub connection_attempts: u64,
    /// Every mutation of this record
    pub status_updates: u64,
    pub last_error: Option<String>,
    pub topology: Topology,
    pub role: Option<String>,
    pub members: Vec<MemberInfo>,
    /// Version and uptime reported by the connected node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
    pub retry: RetrySnapshot,
}

impl StatusRecord {
    pub fn new(policy: &RetryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            configured: true,
            connected: false,
            state: LinkState::Uninitialized,
            message: "initializing".to_string(),
            last_checked: now,
            connection_attempts: 0,
            status_updates: 0,
            last_error: None,
            topology: Topology::Unknown,
            role: None,
            members: Vec::new(),
            version: None,
            uptime_secs: None,
            retry: RetrySnapshot::idle(policy.max_retries),
        }
    }

    /// Record for an optional backend without configuration
    pub fn not_configured(now: DateTime<Utc>) -> Self {
        Self {
            configured: false,
            message: "not configured".to_string(),
            ..Self::new(&RetryPolicy::default(), now)
        }
    }

    /// Bump the mutation counter; every mutating path goes through here
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.status_updates += 1;
        self.last_checked = now;
    }

    pub fn clear_topology(&mut self) {
        self.topology = Topology::Unknown;
        self.role = None;
        self.members.clear();
        self.version = None;
        self.uptime_secs = None;
    }

    pub fn apply_classification(&mut self, classification: Classification) {
        self.topology = classification.topology;
        self.role = classification.role;
        self.members = classification.members;
        self.version = classification.version;
        self.uptime_secs = classification.uptime_secs;
    }

    /// Mark the link as closed by an orderly shutdown
    pub fn mark_shutdown(&mut self, now: DateTime<Utc>) {
        self.connected = false;
        self.state = LinkState::Disconnected;
        self.message = "disconnected (shutdown)".to_string();
        self.retry.reconnecting = false;
        self.clear_topology();
        self.touch(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_serialization() {
        assert_eq!(
            serde_json::to_string(&Topology::SentinelManaged).unwrap(),
            "\"sentinel-managed\""
        );
        assert_eq!(serde_json::to_string(&Topology::Unknown).unwrap(), "\"unknown\"");
        assert_eq!(Topology::Clustered.to_string(), "clustered");
    }

    #[test]
    fn test_not_configured_record() {
        let record = StatusRecord::not_configured(Utc::now());
        assert!(!record.configured);
        assert!(!record.connected);
        assert_eq!(record.message, "not configured");
        assert_eq!(record.topology, Topology::Unknown);
    }

    #[test]
    fn test_status_record_json_shape() {
        let record = StatusRecord::new(&RetryPolicy::default(), Utc::now());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("lastChecked").is_some());
        assert!(value.get("connectionAttempts").is_some());
        assert!(value.get("statusUpdates").is_some());
        assert_eq!(value["state"], "uninitialized");
    }

    #[test]
    fn test_mark_shutdown_clears_topology() {
        let mut record = StatusRecord::new(&RetryPolicy::default(), Utc::now());
        record.connected = true;
        record.apply_classification(
            Classification::new(Topology::Replicated)
                .with_role("primary")
                .with_members(vec![MemberInfo::new("a:1", "secondary", MemberHealth::Up)])
                .with_server(Some("7.0.4".to_string()), Some(90)),
        );
        assert_eq!(record.version.as_deref(), Some("7.0.4"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["uptimeSecs"], 90);

        let before = record.status_updates;
        record.mark_shutdown(Utc::now());

        assert!(!record.connected);
        assert_eq!(record.topology, Topology::Unknown);
        assert!(record.members.is_empty());
        assert!(record.role.is_none());
        assert!(record.version.is_none());
        assert_eq!(record.status_updates, before + 1);
    }

    #[test]
    fn test_member_builder() {
        let member = MemberInfo::new("10.0.0.2:6379", "replica", MemberHealth::Up)
            .with_lag(Some(3))
            .with_name("shard01");
        assert_eq!(member.lag_secs, Some(3));
        assert_eq!(member.name.as_deref(), Some("shard01"));
        assert_eq!(member.uptime_secs, None);
    }
}
