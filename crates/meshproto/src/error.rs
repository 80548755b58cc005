//! Transport-level failures.
//!
//! Protocol-level problems (a reply that is not valid JSON) are not errors:
//! they come back as a [`crate::Response`] with `status: error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout: no complete response from {addr} within {timeout_ms}ms")]
    Timeout { addr: String, timeout_ms: u64 },

    #[error("connection to {addr} lost after {received} bytes of an incomplete response")]
    ConnectionLost { addr: String, received: usize },

    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("client is closed")]
    Closed,

    #[error("client is in an errored state and cannot be reused")]
    Errored,
}

impl ProtocolError {
    /// Refused, unreachable, or silent peer.
    pub fn is_timeout_class(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout { .. } | ProtocolError::Connect { .. }
        )
    }
}
