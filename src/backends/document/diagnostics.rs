/// Typed views of document-store diagnostic command replies
use crate::error::DiagnosticError;
use mongodb::bson::{Bson, Document};

/// Server error codes the classifier reacts to
pub const CODE_UNAUTHORIZED: i32 = 13;
pub const CODE_COMMAND_NOT_FOUND: i32 = 59;
pub const CODE_NO_REPLICATION_ENABLED: i32 = 76;

/// Map a server command failure to a diagnostic error
pub fn command_error(code: i32, code_name: &str, message: &str) -> DiagnosticError {
    let detail = format!("{} ({}): {}", code_name, code, message);
    match code {
        CODE_COMMAND_NOT_FOUND => DiagnosticError::UnknownCommand(detail),
        CODE_NO_REPLICATION_ENABLED => DiagnosticError::NotReplicated(detail),
        CODE_UNAUTHORIZED => DiagnosticError::Unauthorized(detail),
        _ if message.contains("not running with --replSet") => DiagnosticError::NotReplicated(detail),
        _ => DiagnosticError::Failed(detail),
    }
}

/// Numeric field regardless of its BSON integer/double encoding
fn number(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        Bson::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn string(doc: &Document, key: &str) -> Option<String> {
    doc.get_str(key).ok().map(str::to_string)
}

fn flag(doc: &Document, key: &str) -> bool {
    match doc.get(key) {
        Some(Bson::Boolean(b)) => *b,
        Some(_) => number(doc, key).map_or(false, |n| n != 0.0),
        None => false,
    }
}

fn strings(doc: &Document, key: &str) -> Vec<String> {
    doc.get_array(key)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Replication view shared by `serverStatus.repl` and `hello`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationHint {
    pub set_name: Option<String>,
    pub hosts: Vec<String>,
    pub primary: Option<String>,
    pub me: Option<String>,
    pub writable_primary: bool,
    pub secondary: bool,
}

impl ReplicationHint {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            set_name: string(doc, "setName"),
            hosts: strings(doc, "hosts"),
            primary: string(doc, "primary"),
            me: string(doc, "me"),
            writable_primary: flag(doc, "isWritablePrimary") || flag(doc, "ismaster"),
            secondary: flag(doc, "secondary"),
        }
    }

    /// Role of the connected node as the hint reports it
    pub fn role(&self) -> &'static str {
        if self.writable_primary {
            "primary"
        } else if self.secondary {
            "secondary"
        } else {
            "member"
        }
    }
}

/// Parsed `serverStatus` reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStatus {
    pub version: Option<String>,
    /// `mongod` or `mongos`
    pub process: Option<String>,
    pub uptime_secs: Option<i64>,
    pub repl: Option<ReplicationHint>,
}

impl ServerStatus {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            version: string(doc, "version"),
            process: string(doc, "process"),
            uptime_secs: number(doc, "uptime").map(|n| n as i64),
            repl: doc.get_document("repl").ok().map(ReplicationHint::from_document),
        }
    }

    pub fn is_router(&self) -> bool {
        self.process
            .as_deref()
            .map_or(false, |p| p == "mongos" || p.ends_with("/mongos"))
    }
}

/// Parsed `hello` (or legacy `isMaster`) reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelloReply {
    pub repl: ReplicationHint,
    /// `isdbgrid` on a router
    pub msg: Option<String>,
}

impl HelloReply {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            repl: ReplicationHint::from_document(doc),
            msg: string(doc, "msg"),
        }
    }

    pub fn is_router(&self) -> bool {
        self.msg.as_deref() == Some("isdbgrid")
    }
}

/// One member of `replSetGetStatus`
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaMember {
    pub name: String,
    pub state: i32,
    pub state_str: String,
    pub healthy: Option<bool>,
    pub optime_millis: Option<i64>,
    pub uptime_secs: Option<i64>,
    pub is_self: bool,
}

impl ReplicaMember {
    pub fn from_document(doc: &Document) -> Option<Self> {
        let optime_millis = match doc.get("optimeDate") {
            Some(Bson::DateTime(dt)) => Some(dt.timestamp_millis()),
            _ => None,
        };

        Some(Self {
            name: string(doc, "name")?,
            state: number(doc, "state").map_or(-1, |n| n as i32),
            state_str: string(doc, "stateStr").unwrap_or_else(|| "UNKNOWN".to_string()),
            healthy: number(doc, "health").map(|h| h >= 1.0),
            optime_millis,
            uptime_secs: number(doc, "uptime").map(|n| n as i64),
            is_self: flag(doc, "self"),
        })
    }

    pub fn is_primary(&self) -> bool {
        self.state == 1 || self.state_str == "PRIMARY"
    }

    pub fn role(&self) -> String {
        match self.state_str.as_str() {
            "PRIMARY" => "primary".to_string(),
            "SECONDARY" => "secondary".to_string(),
            other => other.to_lowercase(),
        }
    }
}

/// Parsed `replSetGetStatus` reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaSetStatus {
    pub set_name: Option<String>,
    pub members: Vec<ReplicaMember>,
}

impl ReplicaSetStatus {
    pub fn from_document(doc: &Document) -> Self {
        let members = doc
            .get_array("members")
            .map(|items| {
                items
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(ReplicaMember::from_document)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            set_name: string(doc, "set"),
            members,
        }
    }

    pub fn primary(&self) -> Option<&ReplicaMember> {
        self.members.iter().find(|m| m.is_primary())
    }

    /// Replication lag of `member` behind the primary, in seconds
    pub fn lag_secs(&self, member: &ReplicaMember) -> Option<i64> {
        if member.is_primary() {
            return None;
        }
        let primary = self.primary()?.optime_millis?;
        let own = member.optime_millis?;
        Some(((primary - own) / 1000).max(0))
    }
}

/// One entry of `listShards`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEntry {
    pub id: String,
    pub host: String,
    pub state: i32,
}

/// Parsed `listShards` reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardList {
    pub shards: Vec<ShardEntry>,
}

impl ShardList {
    pub fn from_document(doc: &Document) -> Self {
        let shards = doc
            .get_array("shards")
            .map(|items| {
                items
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|shard| {
                        Some(ShardEntry {
                            id: string(shard, "_id")?,
                            host: string(shard, "host").unwrap_or_default(),
                            state: number(shard, "state").map_or(0, |n| n as i32),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { shards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, DateTime};

    #[test]
    fn test_command_error_mapping() {
        assert!(matches!(
            command_error(76, "NoReplicationEnabled", "not running with --replSet"),
            DiagnosticError::NotReplicated(_)
        ));
        assert!(matches!(
            command_error(0, "", "node is not running with --replSet"),
            DiagnosticError::NotReplicated(_)
        ));
        assert!(matches!(
            command_error(59, "CommandNotFound", "no such command: 'listShards'"),
            DiagnosticError::UnknownCommand(_)
        ));
        assert!(matches!(
            command_error(13, "Unauthorized", "not authorized on admin"),
            DiagnosticError::Unauthorized(_)
        ));
        assert!(matches!(
            command_error(11600, "InterruptedAtShutdown", "shutting down"),
            DiagnosticError::Failed(_)
        ));
    }

    #[test]
    fn test_server_status_with_repl() {
        let reply = doc! {
            "host": "db-1:27017",
            "version": "7.0.5",
            "process": "mongod",
            "uptime": 1234.0,
            "repl": {
                "setName": "rs0",
                "hosts": ["db-1:27017", "db-2:27017"],
                "primary": "db-1:27017",
                "isWritablePrimary": true,
                "secondary": false,
            },
        };

        let status = ServerStatus::from_document(&reply);
        assert_eq!(status.uptime_secs, Some(1234));
        assert_eq!(status.version.as_deref(), Some("7.0.5"));
        assert!(!status.is_router());
        let repl = status.repl.unwrap();
        assert_eq!(repl.set_name.as_deref(), Some("rs0"));
        assert_eq!(repl.hosts.len(), 2);
        assert_eq!(repl.role(), "primary");
    }

    #[test]
    fn test_server_status_router() {
        let status = ServerStatus::from_document(&doc! { "process": "mongos", "uptime": 5_i64 });
        assert!(status.is_router());
        assert!(status.repl.is_none());
        assert_eq!(status.uptime_secs, Some(5));
    }

    #[test]
    fn test_legacy_ismaster_flag() {
        let hello = HelloReply::from_document(&doc! { "ismaster": true, "msg": "isdbgrid" });
        assert!(hello.repl.writable_primary);
        assert!(hello.is_router());
    }

    #[test]
    fn test_replica_set_status_and_lag() {
        let now = DateTime::now().timestamp_millis();
        let reply = doc! {
            "set": "rs0",
            "members": [
                {
                    "name": "db-1:27017", "state": 1, "stateStr": "PRIMARY", "health": 1.0,
                    "optimeDate": DateTime::from_millis(now), "self": true, "uptime": 100,
                },
                {
                    "name": "db-2:27017", "state": 2, "stateStr": "SECONDARY", "health": 1.0,
                    "optimeDate": DateTime::from_millis(now - 7_500), "uptime": 90,
                },
                {
                    "name": "db-3:27017", "state": 8, "stateStr": "(not reachable/healthy)", "health": 0.0,
                },
            ],
        };

        let status = ReplicaSetStatus::from_document(&reply);
        assert_eq!(status.set_name.as_deref(), Some("rs0"));
        assert_eq!(status.members.len(), 3);
        assert_eq!(status.primary().unwrap().name, "db-1:27017");
        assert!(status.members[0].is_self);

        assert_eq!(status.lag_secs(&status.members[0]), None);
        assert_eq!(status.lag_secs(&status.members[1]), Some(7));
        assert_eq!(status.lag_secs(&status.members[2]), None);
        assert_eq!(status.members[2].healthy, Some(false));
        assert_eq!(status.members[2].role(), "(not reachable/healthy)");
    }

    #[test]
    fn test_shard_list() {
        let reply = doc! {
            "shards": [
                { "_id": "shard01", "host": "shard01/db-1:27018,db-2:27018", "state": 1 },
                { "_id": "shard02", "host": "shard02/db-3:27018", "state": 0_i64 },
                { "host": "missing-id" },
            ],
            "ok": 1,
        };

        let list = ShardList::from_document(&reply);
        assert_eq!(list.shards.len(), 2);
        assert_eq!(list.shards[0].state, 1);
        assert_eq!(list.shards[1].id, "shard02");
    }
}
