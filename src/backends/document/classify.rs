/// Topology classification for the document store
use super::diagnostics::{HelloReply, ReplicaSetStatus, ReplicationHint, ServerStatus, ShardList};
use crate::core::{Classification, MemberHealth, MemberInfo, Topology};
use crate::error::DiagnosticError;
use async_trait::async_trait;
use tracing::debug;

/// Diagnostic commands the classifier needs
#[async_trait]
pub trait DocumentDiagnostics: Send + Sync {
    async fn server_status(&self) -> Result<ServerStatus, DiagnosticError>;

    async fn hello(&self) -> Result<HelloReply, DiagnosticError>;

    async fn replica_set_status(&self) -> Result<ReplicaSetStatus, DiagnosticError>;

    async fn list_shards(&self) -> Result<ShardList, DiagnosticError>;
}

/// Classify a connected document store
///
/// `serverStatus` decides; `hello` stands in when it is unavailable. A
/// replica set name is verified with `replSetGetStatus` before it is trusted.
pub async fn classify<D>(diagnostics: &D) -> Classification
where
    D: DocumentDiagnostics + ?Sized,
{
    let (repl, router, server) = match diagnostics.server_status().await {
        Ok(status) => {
            let router = status.is_router();
            (status.repl, router, (status.version, status.uptime_secs))
        }
        Err(e) => {
            debug!("serverStatus unavailable, falling back to hello: {}", e);
            match diagnostics.hello().await {
                Ok(hello) => {
                    let router = hello.is_router();
                    (Some(hello.repl), router, (None, None))
                }
                Err(e) => {
                    debug!("hello failed, topology unknown: {}", e);
                    return Classification::unknown();
                }
            }
        }
    };

    let classification = match repl {
        Some(hint) if hint.set_name.is_some() => replicated(hint, diagnostics).await,
        _ if router => sharded(diagnostics).await,
        _ => Classification::new(Topology::Standalone).with_role("standalone"),
    };
    let (version, uptime_secs) = server;
    classification.with_server(version, uptime_secs)
}

async fn replicated<D>(hint: ReplicationHint, diagnostics: &D) -> Classification
where
    D: DocumentDiagnostics + ?Sized,
{
    match diagnostics.replica_set_status().await {
        Ok(status) => {
            let members = status
                .members
                .iter()
                .map(|member| {
                    let health = match member.healthy {
                        Some(true) => MemberHealth::Up,
                        Some(false) => MemberHealth::Down,
                        None => MemberHealth::Unknown,
                    };
                    MemberInfo::new(member.name.clone(), member.role(), health)
                        .with_lag(status.lag_secs(member))
                        .with_uptime(member.uptime_secs)
                })
                .collect();

            let role = status
                .members
                .iter()
                .find(|m| m.is_self)
                .map(|m| m.role())
                .unwrap_or_else(|| hint.role().to_string());

            Classification::new(Topology::Replicated)
                .with_role(role)
                .with_members(members)
        }
        Err(DiagnosticError::NotReplicated(reason)) => {
            debug!("Replica set name reported but replication is off: {}", reason);
            Classification::new(Topology::Standalone).with_role("standalone")
        }
        Err(e) => {
            // Unverified; fall back to the host list the node advertises
            debug!("replSetGetStatus failed, using advertised hosts: {}", e);
            let members = hint
                .hosts
                .iter()
                .map(|host| {
                    let role = if hint.primary.as_deref() == Some(host.as_str()) {
                        "primary"
                    } else {
                        "secondary"
                    };
                    MemberInfo::new(host.clone(), role, MemberHealth::Unknown)
                })
                .collect();

            Classification::new(Topology::Replicated)
                .with_role(hint.role())
                .with_members(members)
        }
    }
}

async fn sharded<D>(diagnostics: &D) -> Classification
where
    D: DocumentDiagnostics + ?Sized,
{
    let members = match diagnostics.list_shards().await {
        Ok(list) => list
            .shards
            .iter()
            .map(|shard| {
                let health = if shard.state == 1 {
                    MemberHealth::Up
                } else {
                    MemberHealth::Down
                };
                MemberInfo::new(shard.host.clone(), "shard", health).with_name(shard.id.clone())
            })
            .collect(),
        Err(e) => {
            debug!("listShards failed, members unknown: {}", e);
            Vec::new()
        }
    };

    Classification::new(Topology::Sharded)
        .with_role("router")
        .with_members(members)
}
