//! Wire protocol for the 3D application's command listener.
//!
//! Requests are newline-terminated JSON objects; replies are bare JSON
//! objects framed by a pluggable [`FrameDetector`].

pub mod client;
pub mod error;
pub mod frame;
pub mod message;
pub mod probe;

pub use client::{ClientConfig, CommandTransport, ConnectionState, ProtocolClient};
pub use error::ProtocolError;
pub use frame::{BalancedJson, FrameDetector, TrailingBrace};
pub use message::{Command, Response, ResponseStatus};
pub use probe::{check_connection, ConnectionCheck, ProbeOutcome, PROBE_COMMAND};
