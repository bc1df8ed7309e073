/// Typed views of cache-store diagnostic replies
///
/// `INFO` is a text block of `key:value` lines grouped by `# Section`
/// headers; `CLUSTER NODES` is one line per node; `SENTINEL MASTERS` is an
/// array of flat key/value arrays.
use super::resp::RespValue;
use crate::core::{MemberHealth, MemberInfo};
use std::collections::HashMap;

/// Replica line of `INFO replication` on a primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEntry {
    pub address: String,
    pub state: String,
    pub lag_secs: Option<i64>,
}

impl ReplicaEntry {
    /// Parse the value of a `slaveN:` line
    /// (`ip=10.0.0.2,port=6379,state=online,offset=1234,lag=0`)
    pub fn parse(value: &str) -> Option<Self> {
        let fields: HashMap<&str, &str> = value
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let ip = fields.get("ip")?;
        let port = fields.get("port")?;
        Some(Self {
            address: format!("{}:{}", ip, port),
            state: fields.get("state").unwrap_or(&"unknown").to_string(),
            lag_secs: fields.get("lag").and_then(|v| v.parse().ok()),
        })
    }

    pub fn to_member(&self) -> MemberInfo {
        let health = match self.state.as_str() {
            "online" => MemberHealth::Up,
            "wait_bgsave" | "send_bulk" => MemberHealth::Unknown,
            _ => MemberHealth::Down,
        };
        MemberInfo::new(self.address.clone(), "replica", health).with_lag(self.lag_secs)
    }
}

/// Parsed `INFO` reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: Option<String>,
    /// `redis_mode`: standalone, cluster or sentinel
    pub mode: Option<String>,
    /// `role`: master or slave
    pub role: Option<String>,
    pub cluster_enabled: bool,
    pub connected_slaves: u32,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
    pub master_link_up: Option<bool>,
    pub replicas: Vec<ReplicaEntry>,
    pub uptime_secs: Option<i64>,
}

impl ServerInfo {
    pub fn parse(text: &str) -> Self {
        let mut info = ServerInfo::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            match key {
                "redis_version" => info.version = Some(value.to_string()),
                "redis_mode" => info.mode = Some(value.to_string()),
                "role" => info.role = Some(value.to_string()),
                "cluster_enabled" => info.cluster_enabled = value == "1",
                "connected_slaves" => info.connected_slaves = value.parse().unwrap_or(0),
                "master_host" => info.master_host = Some(value.to_string()),
                "master_port" => info.master_port = value.parse().ok(),
                "master_link_status" => info.master_link_up = Some(value == "up"),
                "uptime_in_seconds" => info.uptime_secs = value.parse().ok(),
                _ if is_replica_key(key) => {
                    if let Some(entry) = ReplicaEntry::parse(value) {
                        info.replicas.push(entry);
                    }
                }
                _ => {}
            }
        }

        info
    }

    pub fn is_sentinel(&self) -> bool {
        self.mode.as_deref() == Some("sentinel")
    }

    pub fn is_replica(&self) -> bool {
        self.role.as_deref() == Some("slave")
    }

    pub fn is_primary(&self) -> bool {
        self.role.as_deref() == Some("master")
    }

    /// The primary a replica follows, as a member entry
    pub fn primary_member(&self) -> Option<MemberInfo> {
        let host = self.master_host.as_ref()?;
        let address = match self.master_port {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        let health = match self.master_link_up {
            Some(true) => MemberHealth::Up,
            Some(false) => MemberHealth::Down,
            None => MemberHealth::Unknown,
        };
        Some(MemberInfo::new(address, "primary", health))
    }
}

fn is_replica_key(key: &str) -> bool {
    key.strip_prefix("slave")
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// One line of `CLUSTER NODES`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub address: String,
    pub flags: Vec<String>,
    pub primary_id: Option<String>,
    pub link_connected: bool,
}

impl ClusterNode {
    /// `<id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <link> <slots...>`
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return None;
        }

        let address = parts[1]
            .split(|c: char| c == '@' || c == ',')
            .next()
            .unwrap_or_default()
            .to_string();
        let primary_id = match parts[3] {
            "-" => None,
            id => Some(id.to_string()),
        };

        Some(Self {
            id: parts[0].to_string(),
            address,
            flags: parts[2].split(',').map(str::to_string).collect(),
            primary_id,
            link_connected: parts[7] == "connected",
        })
    }

    pub fn parse_all(text: &str) -> Vec<Self> {
        text.lines().filter_map(Self::parse).collect()
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_failed(&self) -> bool {
        self.has_flag("fail") || self.has_flag("fail?")
    }

    pub fn to_member(&self) -> MemberInfo {
        let role = if self.has_flag("master") {
            "primary"
        } else if self.has_flag("slave") {
            "replica"
        } else {
            "cluster-node"
        };
        let health = if self.is_failed() || !self.link_connected {
            MemberHealth::Down
        } else if self.has_flag("handshake") || self.has_flag("noaddr") {
            MemberHealth::Unknown
        } else {
            MemberHealth::Up
        };
        MemberInfo::new(self.address.clone(), role, health).with_name(self.id.clone())
    }
}

/// One entry of `SENTINEL MASTERS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelMaster {
    pub name: String,
    pub address: String,
    pub flags: Vec<String>,
}

impl SentinelMaster {
    pub fn from_resp(value: &RespValue) -> Option<Self> {
        let RespValue::Array(Some(items)) = value else {
            return None;
        };

        let mut fields = HashMap::new();
        for pair in items.chunks(2) {
            if let [key, value] = pair {
                if let (Some(key), Some(value)) = (key.as_text(), value.as_text()) {
                    fields.insert(key, value);
                }
            }
        }

        let name = fields.get("name")?.clone();
        let ip = fields.get("ip")?;
        let port = fields.get("port")?;
        Some(Self {
            name,
            address: format!("{}:{}", ip, port),
            flags: fields
                .get("flags")
                .map(|f| f.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }

    /// Parse the whole reply; entries that do not look like a primary are skipped
    pub fn parse_reply(reply: RespValue) -> Vec<Self> {
        reply
            .into_array()
            .unwrap_or_default()
            .iter()
            .filter_map(Self::from_resp)
            .collect()
    }

    pub fn is_down(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f.as_str(), "s_down" | "o_down" | "disconnected"))
    }

    pub fn to_member(&self) -> MemberInfo {
        let health = if self.is_down() {
            MemberHealth::Down
        } else {
            MemberHealth::Up
        };
        MemberInfo::new(self.address.clone(), "primary", health).with_name(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const PRIMARY_INFO: &str = "# Server\r\n\
        redis_version:7.2.4\r\n\
        redis_mode:standalone\r\n\
        uptime_in_seconds:3600\r\n\
        \r\n\
        # Replication\r\n\
        role:master\r\n\
        connected_slaves:2\r\n\
        slave0:ip=10.0.0.2,port=6379,state=online,offset=1200,lag=0\r\n\
        slave1:ip=10.0.0.3,port=6379,state=wait_bgsave,offset=0,lag=4\r\n\
        master_repl_offset:1200\r\n\
        \r\n\
        # Cluster\r\n\
        cluster_enabled:0\r\n";

    #[test]
    fn test_parse_primary_info() {
        let info = ServerInfo::parse(PRIMARY_INFO);
        assert_eq!(info.version.as_deref(), Some("7.2.4"));
        assert!(info.is_primary());
        assert!(!info.cluster_enabled);
        assert_eq!(info.connected_slaves, 2);
        assert_eq!(info.uptime_secs, Some(3600));
        assert_eq!(info.replicas.len(), 2);

        let first = info.replicas[0].to_member();
        assert_eq!(first.address, "10.0.0.2:6379");
        assert_eq!(first.health, MemberHealth::Up);
        assert_eq!(first.lag_secs, Some(0));
        assert_eq!(info.replicas[1].to_member().health, MemberHealth::Unknown);
    }

    #[test]
    fn test_parse_replica_info() {
        let info = ServerInfo::parse(
            "role:slave\nmaster_host:10.0.0.1\nmaster_port:6379\nmaster_link_status:down\nmaster_last_io_seconds_ago:-1\n",
        );
        assert!(info.is_replica());
        let primary = info.primary_member().unwrap();
        assert_eq!(primary.address, "10.0.0.1:6379");
        assert_eq!(primary.role, "primary");
        assert_eq!(primary.health, MemberHealth::Down);
        // seconds since the last I/O is not replication lag
        assert_eq!(primary.lag_secs, None);
    }

    #[test]
    fn test_replica_key_detection() {
        assert!(is_replica_key("slave0"));
        assert!(is_replica_key("slave12"));
        assert!(!is_replica_key("slave_read_only"));
        assert!(!is_replica_key("slave"));
    }

    #[test]
    fn test_parse_sentinel_mode() {
        let info = ServerInfo::parse("# Server\nredis_mode:sentinel\n# Sentinel\nsentinel_masters:1\n");
        assert!(info.is_sentinel());
        assert!(info.role.is_none());
    }

    #[test]
    fn test_parse_cluster_nodes() {
        let text = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002,node-2 master - 0 1426238316232 2 connected 5461-10922
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave,fail 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 disconnected
";
        let nodes = ClusterNode::parse_all(text);
        assert_eq!(nodes.len(), 4);

        assert_eq!(nodes[0].address, "127.0.0.1:30004");
        assert!(nodes[0].primary_id.is_some());
        assert_eq!(nodes[0].to_member().role, "replica");

        assert_eq!(nodes[1].address, "127.0.0.1:30002");
        assert_eq!(nodes[2].to_member().role, "primary");
        assert_eq!(nodes[2].to_member().health, MemberHealth::Up);

        assert!(nodes[3].is_failed());
        assert_eq!(nodes[3].to_member().health, MemberHealth::Down);
    }

    #[test]
    fn test_parse_cluster_nodes_skips_garbage() {
        assert!(ClusterNode::parse_all("not a node line\n\n").is_empty());
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Some(Bytes::from(s.to_string())))
    }

    fn master_entry(name: &str, port: &str, flags: &str) -> RespValue {
        RespValue::Array(Some(vec![
            bulk("name"),
            bulk(name),
            bulk("ip"),
            bulk("10.0.0.1"),
            bulk("port"),
            bulk(port),
            bulk("flags"),
            bulk(flags),
            bulk("num-slaves"),
            bulk("2"),
            bulk("num-other-sentinels"),
            bulk("2"),
        ]))
    }

    #[test]
    fn test_parse_sentinel_masters() {
        let reply = RespValue::Array(Some(vec![
            master_entry("mymaster", "6379", "master"),
            master_entry("cache-b", "6380", "master,s_down,o_down"),
            RespValue::Integer(3),
        ]));

        let masters = SentinelMaster::parse_reply(reply);
        assert_eq!(masters.len(), 2);
        assert_eq!(masters[0].name, "mymaster");
        assert_eq!(masters[0].to_member().health, MemberHealth::Up);
        assert_eq!(masters[1].address, "10.0.0.1:6380");
        assert_eq!(masters[1].to_member().health, MemberHealth::Down);
        assert_eq!(masters[1].to_member().name.as_deref(), Some("cache-b"));
    }
}
