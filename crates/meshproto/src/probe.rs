//! Liveness probe.

use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::{ClientConfig, Command, ProtocolClient};

/// Introspection command used as the probe.
pub const PROBE_COMMAND: &str = "get_scene_info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Nothing answered in time, or the connection failed.
    NoResponse,
    /// Something answered, but not with a protocol reply.
    InvalidPayload,
    Live,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub connected: bool,
    pub outcome: ProbeOutcome,
    pub endpoint: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probe the listener on a throwaway connection. Never fails; the outcome
/// says what happened.
pub async fn check_connection(config: &ClientConfig) -> ConnectionCheck {
    let probe_config = config.clone().with_timeout(config.probe_timeout().as_millis() as u64);
    let endpoint = probe_config.addr();
    let mut client = ProtocolClient::new(probe_config);

    let start = Instant::now();
    let result = client.execute(Command::new(PROBE_COMMAND, json!({}))).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    client.close().await;

    let check = match result {
        Ok(response) if response.is_protocol_payload() => ConnectionCheck {
            connected: true,
            outcome: ProbeOutcome::Live,
            endpoint,
            latency_ms,
            error: None,
        },
        Ok(response) => ConnectionCheck {
            connected: false,
            outcome: ProbeOutcome::InvalidPayload,
            endpoint,
            latency_ms,
            error: Some(response.error_text()),
        },
        Err(e) => ConnectionCheck {
            connected: false,
            outcome: ProbeOutcome::NoResponse,
            endpoint,
            latency_ms,
            error: Some(e.to_string()),
        },
    };

    info!(
        endpoint = %check.endpoint,
        outcome = ?check.outcome,
        latency_ms = check.latency_ms,
        "connection check"
    );
    check
}
