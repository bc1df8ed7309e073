/// Topology classification for the cache store
use super::info::{ClusterNode, SentinelMaster, ServerInfo};
use crate::core::{Classification, MemberInfo, Topology};
use crate::error::DiagnosticError;
use async_trait::async_trait;
use tracing::debug;

/// How the cache store is reached, fixed by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cluster,
    Sentinel,
    Standard,
}

/// Diagnostic commands the classifier needs
#[async_trait]
pub trait CacheDiagnostics: Send + Sync {
    /// Raw `INFO` text
    async fn info(&self) -> Result<String, DiagnosticError>;

    /// Raw `CLUSTER NODES` text
    async fn cluster_nodes(&self) -> Result<String, DiagnosticError>;

    async fn sentinel_masters(&self) -> Result<Vec<SentinelMaster>, DiagnosticError>;
}

/// Map an error reply to a diagnostic error
pub fn reply_error(message: &str) -> DiagnosticError {
    let upper = message.to_ascii_uppercase();
    if upper.contains("UNKNOWN COMMAND") || upper.contains("UNKNOWN SUBCOMMAND") {
        DiagnosticError::UnknownCommand(message.to_string())
    } else if upper.starts_with("NOAUTH") || upper.starts_with("NOPERM") || upper.starts_with("WRONGPASS") {
        DiagnosticError::Unauthorized(message.to_string())
    } else {
        DiagnosticError::Failed(message.to_string())
    }
}

/// Classify a connected cache store
///
/// The configured mode wins over anything the server reports; `INFO` is
/// only consulted for a single-endpoint connection. Diagnostic failures
/// degrade the result, they never fail it.
pub async fn classify<D>(mode: CacheMode, diagnostics: &D) -> Classification
where
    D: CacheDiagnostics + ?Sized,
{
    match mode {
        CacheMode::Cluster => clustered(diagnostics).await,
        CacheMode::Sentinel => sentinel_managed(diagnostics).await,
        CacheMode::Standard => match diagnostics.info().await {
            Ok(text) => from_info(ServerInfo::parse(&text), diagnostics).await,
            Err(DiagnosticError::UnknownCommand(_)) => {
                debug!("INFO not supported, probing for a sentinel");
                match diagnostics.sentinel_masters().await {
                    Ok(masters) => Classification::new(Topology::SentinelManaged)
                        .with_role("sentinel")
                        .with_members(masters.iter().map(SentinelMaster::to_member).collect()),
                    Err(e) => {
                        debug!("Sentinel probe failed, assuming standalone: {}", e);
                        Classification::new(Topology::Standalone).with_role("standalone")
                    }
                }
            }
            Err(e) => {
                debug!("INFO failed, topology unknown: {}", e);
                Classification::unknown()
            }
        },
    }
}

async fn from_info<D>(info: ServerInfo, diagnostics: &D) -> Classification
where
    D: CacheDiagnostics + ?Sized,
{
    let version = info.version.clone();
    let uptime_secs = info.uptime_secs;
    shape_from_info(info, diagnostics)
        .await
        .with_server(version, uptime_secs)
}

async fn shape_from_info<D>(info: ServerInfo, diagnostics: &D) -> Classification
where
    D: CacheDiagnostics + ?Sized,
{
    if info.is_sentinel() {
        return sentinel_managed(diagnostics).await;
    }

    if info.cluster_enabled {
        return clustered(diagnostics).await;
    }

    if info.is_replica() {
        let members: Vec<MemberInfo> = info.primary_member().into_iter().collect();
        return Classification::new(Topology::Replicated)
            .with_role("replica")
            .with_members(members);
    }

    if info.is_primary() && info.connected_slaves > 0 {
        let members = info.replicas.iter().map(|r| r.to_member()).collect();
        return Classification::new(Topology::Replicated)
            .with_role("primary")
            .with_members(members);
    }

    Classification::new(Topology::Standalone).with_role("standalone")
}

async fn clustered<D>(diagnostics: &D) -> Classification
where
    D: CacheDiagnostics + ?Sized,
{
    let members = match diagnostics.cluster_nodes().await {
        Ok(text) => ClusterNode::parse_all(&text)
            .iter()
            .map(ClusterNode::to_member)
            .collect(),
        Err(e) => {
            debug!("CLUSTER NODES failed, members unknown: {}", e);
            Vec::new()
        }
    };

    Classification::new(Topology::Clustered)
        .with_role("cluster-node")
        .with_members(members)
}

async fn sentinel_managed<D>(diagnostics: &D) -> Classification
where
    D: CacheDiagnostics + ?Sized,
{
    let members = match diagnostics.sentinel_masters().await {
        Ok(masters) => masters.iter().map(SentinelMaster::to_member).collect(),
        Err(e) => {
            debug!("SENTINEL MASTERS failed, members unknown: {}", e);
            Vec::new()
        }
    };

    Classification::new(Topology::SentinelManaged)
        .with_role("sentinel")
        .with_members(members)
}
