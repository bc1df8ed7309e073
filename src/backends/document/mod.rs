/// Document store backend, reached through the official driver
pub mod classify;
pub mod diagnostics;

pub use classify::DocumentDiagnostics;

use crate::config::{ConfigError, DocumentConfig};
use crate::core::{Classification, Supervisor, Transport};
use crate::error::{AtalayaError, AtalayaResult, DiagnosticError};
use crate::utils::redact_credentials;
use async_trait::async_trait;
use diagnostics::{HelloReply, ReplicaSetStatus, ServerStatus, ShardList};
use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::ops::Deref;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

/// Document store transport
///
/// The driver keeps its own connection pool and reconnects in the
/// background, so the client survives a failed handshake; only the
/// supervisor's view of the link goes down.
pub struct DocumentTransport {
    uri: String,
    app_name: String,
    connect_timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl DocumentTransport {
    pub fn new<U: Into<String>, A: Into<String>>(uri: U, app_name: A, connect_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            app_name: app_name.into(),
            connect_timeout,
            client: RwLock::new(None),
        }
    }

    fn current_client(&self) -> Option<Client> {
        self.client.read().ok().and_then(|slot| slot.clone())
    }

    async fn build_client(&self) -> AtalayaResult<Client> {
        let mut options = ClientOptions::parse(self.uri.as_str())
            .await
            .map_err(|e| AtalayaError::backend(format!("invalid document uri: {}", e)))?;
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);
        options.app_name = Some(self.app_name.clone());

        let client = Client::with_options(options)
            .map_err(|e| AtalayaError::backend(format!("failed to create client: {}", e)))?;
        if let Ok(mut slot) = self.client.write() {
            *slot = Some(client.clone());
        }
        Ok(client)
    }

    async fn admin_command(&self, command: Document) -> Result<Document, DiagnosticError> {
        let client = self
            .current_client()
            .ok_or_else(|| DiagnosticError::Failed("not connected".to_string()))?;

        client
            .database("admin")
            .run_command(command, None)
            .await
            .map_err(|e| diagnostic_error(&e))
    }
}

/// Classify a driver error for the topology classifier
fn diagnostic_error(err: &mongodb::error::Error) -> DiagnosticError {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => {
            diagnostics::command_error(command.code, &command.code_name, &command.message)
        }
        ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            DiagnosticError::Timeout(err.to_string())
        }
        _ => DiagnosticError::Failed(err.to_string()),
    }
}

#[async_trait]
impl DocumentDiagnostics for DocumentTransport {
    async fn server_status(&self) -> Result<ServerStatus, DiagnosticError> {
        let reply = self.admin_command(doc! { "serverStatus": 1 }).await?;
        Ok(ServerStatus::from_document(&reply))
    }

    async fn hello(&self) -> Result<HelloReply, DiagnosticError> {
        let reply = match self.admin_command(doc! { "hello": 1 }).await {
            Err(DiagnosticError::UnknownCommand(_)) => self.admin_command(doc! { "isMaster": 1 }).await?,
            other => other?,
        };
        Ok(HelloReply::from_document(&reply))
    }

    async fn replica_set_status(&self) -> Result<ReplicaSetStatus, DiagnosticError> {
        let reply = self.admin_command(doc! { "replSetGetStatus": 1 }).await?;
        Ok(ReplicaSetStatus::from_document(&reply))
    }

    async fn list_shards(&self) -> Result<ShardList, DiagnosticError> {
        let reply = self.admin_command(doc! { "listShards": 1 }).await?;
        Ok(ShardList::from_document(&reply))
    }
}

#[async_trait]
impl Transport for DocumentTransport {
    fn describe(&self) -> String {
        redact_credentials(&self.uri)
    }

    async fn open(&self) -> AtalayaResult<()> {
        let client = match self.current_client() {
            Some(client) => client,
            None => self.build_client().await?,
        };

        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| AtalayaError::backend(e.to_string()))?;

        debug!("Document store answered ping at {}", self.describe());
        Ok(())
    }

    async fn ping(&self) -> AtalayaResult<()> {
        self.admin_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(AtalayaError::from)
    }

    async fn classify(&self) -> Classification {
        classify::classify(self).await
    }

    async fn quit(&self) -> AtalayaResult<()> {
        let client = self.client.write().ok().and_then(|mut slot| slot.take());
        if let Some(client) = client {
            client.shutdown().await;
            info!("Document store client shut down");
        }
        Ok(())
    }

    fn force_close(&self) {
        if let Ok(mut slot) = self.client.write() {
            slot.take();
        }
    }

    fn reconnects_in_background(&self) -> bool {
        true
    }
}

/// Supervisor of the document store connection
pub struct DocumentSupervisor {
    inner: Supervisor<DocumentTransport>,
}

impl DocumentSupervisor {
    pub fn new(required: bool) -> Self {
        Self {
            inner: Supervisor::new("document", required),
        }
    }

    /// Connect using `config`; `app_name` identifies this process to the server
    pub async fn connect(&self, config: Option<&DocumentConfig>, app_name: &str) -> AtalayaResult<()> {
        let Some(config) = config.filter(|c| !c.uri.trim().is_empty()) else {
            self.inner.mark_not_configured();
            return Ok(());
        };

        let uri = config.uri.trim();
        if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
            let err = ConfigError::ValidationError(format!(
                "Invalid document uri '{}': must start with mongodb:// or mongodb+srv://",
                redact_credentials(uri)
            ));
            self.inner.mark_misconfigured(&err.to_string());
            return Err(err.into());
        }

        let settings = config.link_settings();
        let transport = DocumentTransport::new(uri, app_name, settings.connect_timeout);
        self.inner.start(transport, settings).await
    }
}

impl Deref for DocumentSupervisor {
    type Target = Supervisor<DocumentTransport>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LinkState;

    #[test]
    fn test_describe_hides_credentials() {
        let transport = DocumentTransport::new("mongodb://app:pw@db-1:27017", "atalaya", Duration::from_secs(1));
        assert_eq!(transport.describe(), "mongodb://***@db-1:27017");
    }

    #[tokio::test]
    async fn test_absent_config() {
        let supervisor = DocumentSupervisor::new(true);
        supervisor.connect(None, "atalaya").await.unwrap();

        let status = supervisor.status();
        assert!(!status.configured);
        assert_eq!(status.message, "not configured");
    }

    #[tokio::test]
    async fn test_invalid_uri() {
        let supervisor = DocumentSupervisor::new(true);
        let config = DocumentConfig::new("postgres://db:5432");
        let err = supervisor.connect(Some(&config), "atalaya").await.unwrap_err();

        assert!(matches!(err, AtalayaError::Config(_)));
        assert_eq!(supervisor.status().state, LinkState::Error);
    }

    #[tokio::test]
    async fn test_ping_without_client() {
        let transport = DocumentTransport::new("mongodb://127.0.0.1:1", "atalaya", Duration::from_millis(100));
        assert!(transport.ping().await.is_err());
        assert_eq!(
            transport.server_status().await,
            Err(DiagnosticError::Failed("not connected".to_string()))
        );
        transport.quit().await.unwrap();
    }
}
