//! TCP client for the 3D application's command listener.
//!
//! One client owns one socket. The socket is opened lazily on the first
//! command and reused for later commands until `close()`:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closed
//!                      |             |
//!                      +-> Errored <-+
//! ```
//!
//! `Closed` and `Errored` are terminal. A client that hit a transport error
//! is not reconnected; callers build a new one.
//!
//! Usage:
//! ```ignore
//! let mut client = ProtocolClient::new(ClientConfig::new("127.0.0.1", 9876));
//! let response = client.execute(Command::new("get_scene_info", json!({}))).await?;
//! client.close().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::{Command, FrameDetector, ProtocolError, Response, TrailingBrace};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Bound on one full exchange (connect + write + read)
    pub timeout_ms: u64,
    /// Bound on a `check_connection` probe, never above 5s
    pub probe_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_ms: 30_000,
            probe_timeout_ms: meshconf::infra::MAX_PROBE_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout_ms: u64) -> Self {
        self.probe_timeout_ms = probe_timeout_ms.min(meshconf::infra::MAX_PROBE_TIMEOUT_MS);
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.min(meshconf::infra::MAX_PROBE_TIMEOUT_MS))
    }
}

impl From<&meshconf::ProtocolConfig> for ClientConfig {
    fn from(config: &meshconf::ProtocolConfig) -> Self {
        ClientConfig::new(&config.host, config.port)
            .with_timeout(config.timeout_ms)
            .with_probe_timeout(config.probe_timeout_ms)
    }
}

/// Something that can carry commands to the listener.
///
/// The executor and the pipeline's script runner talk to this rather than to
/// a socket, so tests can substitute a scripted transport.
#[async_trait]
pub trait CommandTransport: Send {
    async fn execute(&mut self, command: Command) -> Result<Response, ProtocolError>;

    /// Release the connection. Calling twice is harmless.
    async fn close(&mut self);
}

pub struct ProtocolClient {
    config: ClientConfig,
    detector: Arc<dyn FrameDetector>,
    stream: Option<TcpStream>,
    state: ConnectionState,
}

impl ProtocolClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_detector(config, Arc::new(TrailingBrace))
    }

    pub fn with_detector(config: ClientConfig, detector: Arc<dyn FrameDetector>) -> Self {
        Self {
            config,
            detector,
            stream: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send one command and wait for its response.
    ///
    /// Resolves or fails within `timeout_ms`. A reply that is not valid JSON
    /// is returned as an error-status [`Response`], not as `Err`.
    #[tracing::instrument(
        name = "protocol.execute",
        skip(self, command),
        fields(command.id = %command.id, command.type = %command.command_type)
    )]
    pub async fn execute(&mut self, command: Command) -> Result<Response, ProtocolError> {
        match self.state {
            ConnectionState::Closed => return Err(ProtocolError::Closed),
            ConnectionState::Errored => return Err(ProtocolError::Errored),
            _ => {}
        }

        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, self.exchange(&command)).await {
            Ok(Ok(response)) => {
                trace!(status = ?response.status, bytes = response.raw.len(), "response received");
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "command exchange failed");
                self.fail();
                Err(e)
            }
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "command exchange timed out");
                self.fail();
                Err(ProtocolError::Timeout {
                    addr: self.config.addr(),
                    timeout_ms: self.config.timeout_ms,
                })
            }
        }
    }

    /// Shut the socket down and move to `Closed`. Idempotent; an errored
    /// client stays errored.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "socket shutdown failed");
            }
        }
        if self.state != ConnectionState::Errored {
            self.state = ConnectionState::Closed;
        }
    }

    async fn exchange(&mut self, command: &Command) -> Result<Response, ProtocolError> {
        let addr = self.config.addr();
        let detector = Arc::clone(&self.detector);

        if self.stream.is_none() {
            self.state = ConnectionState::Connecting;
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| ProtocolError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "failed to set TCP_NODELAY");
            }
            debug!(%addr, "connected");
            self.stream = Some(stream);
            self.state = ConnectionState::Connected;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(ProtocolError::Closed);
        };

        let wire = command.to_wire()?;
        stream
            .write_all(&wire)
            .await
            .map_err(|source| ProtocolError::Io {
                addr: addr.clone(),
                source,
            })?;

        let buf = read_frame(stream, detector.as_ref(), &addr).await?;
        Ok(Response::from_bytes(&buf))
    }

    fn fail(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Errored;
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!(addr = %self.config.addr(), "protocol client dropped without close()");
        }
    }
}

#[async_trait]
impl CommandTransport for ProtocolClient {
    async fn execute(&mut self, command: Command) -> Result<Response, ProtocolError> {
        ProtocolClient::execute(self, command).await
    }

    async fn close(&mut self) {
        ProtocolClient::close(self).await
    }
}

async fn read_frame(
    stream: &mut TcpStream,
    detector: &dyn FrameDetector,
    addr: &str,
) -> Result<BytesMut, ProtocolError> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|source| ProtocolError::Io {
                addr: addr.to_string(),
                source,
            })?;
        if n == 0 {
            return Err(ProtocolError::ConnectionLost {
                addr: addr.to_string(),
                received: buf.len(),
            });
        }
        if detector.is_complete(&buf) {
            return Ok(buf);
        }
        if buf.capacity() == buf.len() {
            buf.reserve(READ_CHUNK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("localhost", 9876);
        assert_eq!(config.addr(), "localhost:9876");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_probe_timeout_clamped() {
        let config = ClientConfig::new("localhost", 9876).with_probe_timeout(60_000);
        assert_eq!(config.probe_timeout_ms, 5_000);
    }

    #[test]
    fn test_from_protocol_config() {
        let proto = meshconf::ProtocolConfig {
            host: "blender.local".to_string(),
            port: 9999,
            timeout_ms: 1_000,
            probe_timeout_ms: 20_000,
        };
        let config = ClientConfig::from(&proto);
        assert_eq!(config.addr(), "blender.local:9999");
        assert_eq!(config.timeout_ms, 1_000);
        assert_eq!(config.probe_timeout_ms, 5_000);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Errored.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }

    #[tokio::test]
    async fn test_close_before_connect_is_idempotent() {
        let mut client = ProtocolClient::new(ClientConfig::new("127.0.0.1", 1));
        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
