/// Single RESP connection used for handshakes, probes and diagnostics
use super::resp::{RespEncoder, RespParser, RespValue};
use crate::error::{AtalayaError, AtalayaResult};
use bytes::BytesMut;
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Request/response connection to one cache node
pub struct RespConnection {
    stream: TcpStream,
    buffer: BytesMut,
    addr: String,
    io_timeout: Duration,
}

impl RespConnection {
    /// Connect to `addr` (`host:port`) within `limit`
    pub async fn connect(addr: &str, limit: Duration) -> AtalayaResult<Self> {
        debug!("Connecting to cache node {}", addr);

        let stream = match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Connection to cache node {} failed: {}", addr, e);
                return Err(AtalayaError::Network(e));
            }
            Err(_) => {
                return Err(AtalayaError::timeout(format!("connect to {}", addr)));
            }
        };

        if let Err(e) = Self::configure_stream(&stream) {
            warn!("Failed to configure stream to {}: {}", addr, e);
        }

        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            addr: addr.to_string(),
            io_timeout: limit,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and wait for its reply
    ///
    /// Error replies are returned as `RespValue::Error`; only I/O and
    /// protocol failures become `Err`.
    pub async fn execute(&mut self, command: &str, args: &[&str]) -> AtalayaResult<RespValue> {
        let request = RespEncoder::encode(&RespEncoder::create_command(command, args));

        match timeout(self.io_timeout, self.round_trip(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AtalayaError::timeout(format!("{} on {}", command, self.addr))),
        }
    }

    /// Like [`execute`](Self::execute) but turns an error reply into `Err`
    pub async fn execute_ok(&mut self, command: &str, args: &[&str]) -> AtalayaResult<RespValue> {
        match self.execute(command, args).await? {
            RespValue::Error(message) => Err(AtalayaError::backend(format!(
                "{} rejected by {}: {}",
                command, self.addr, message
            ))),
            reply => Ok(reply),
        }
    }

    /// Send QUIT and close the socket
    pub async fn quit(mut self) -> AtalayaResult<()> {
        let reply = self.execute("QUIT", &[]).await;
        let _ = self.stream.shutdown().await;
        reply.map(|_| ())
    }

    async fn round_trip(&mut self, request: &[u8]) -> AtalayaResult<RespValue> {
        self.stream.write_all(request).await?;

        loop {
            if let Some(reply) = RespParser::parse(&mut self.buffer)
                .map_err(|e| AtalayaError::backend(format!("protocol error from {}: {}", self.addr, e)))?
            {
                return Ok(reply);
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(AtalayaError::Network(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection to {} closed", self.addr),
                )));
            }
        }
    }

    fn configure_stream(stream: &TcpStream) -> Result<(), io::Error> {
        stream.set_nodelay(true)?;
        SockRef::from(stream).set_keepalive(true)?;
        Ok(())
    }
}
