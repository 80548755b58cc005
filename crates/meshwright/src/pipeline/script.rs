//! Side-effect executor for script stages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use meshproto::{ClientConfig, Command, CommandTransport, ProtocolError};

use crate::executor::{Connector, TcpConnector};

/// The command that runs a Python payload inside the 3D application.
pub const EXECUTE_CODE: &str = "execute_code";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),

    #[error("script failed: {0}")]
    Failed(String),
}

/// Runs one self-contained script and returns what it printed, parsed as
/// JSON where possible.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run_script(&self, code: &str) -> Result<Value, ScriptError>;
}

/// Sends scripts over a protocol transport as `execute_code` commands.
///
/// A transport that fails is closed and dropped. The next script opens a
/// fresh one through the connector.
pub struct ProtocolScriptExecutor {
    connector: Arc<dyn Connector>,
    transport: Mutex<Option<Box<dyn CommandTransport>>>,
}

impl ProtocolScriptExecutor {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            transport: Mutex::new(None),
        }
    }

    pub fn connect(config: ClientConfig) -> Self {
        Self::new(Arc::new(TcpConnector::new(config)))
    }

    pub async fn close(&self) {
        if let Some(mut transport) = self.transport.lock().await.take() {
            transport.close().await;
        }
    }
}

/// The listener wraps captured stdout as `{"result": "<text>"}`; unwrap it
/// and parse the last JSON object printed.
fn script_output(result: Option<Value>) -> Value {
    let result = result.unwrap_or(Value::Null);
    let text = match &result {
        Value::Object(map) => match map.get("result").or_else(|| map.get("output")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => return other.clone(),
            None => return result,
        },
        Value::String(s) => s.clone(),
        _ => return result,
    };
    text.lines()
        .rev()
        .find_map(|line| {
            llmbridge::extract_json_object(line)
                .and_then(|obj| serde_json::from_str::<Value>(obj).ok())
        })
        .unwrap_or(Value::String(text))
}

#[async_trait]
impl ScriptExecutor for ProtocolScriptExecutor {
    #[tracing::instrument(name = "script.run", skip(self, code), fields(script.bytes = code.len()))]
    async fn run_script(&self, code: &str) -> Result<Value, ScriptError> {
        let command = Command::new(EXECUTE_CODE, json!({"code": code}));
        let mut slot = self.transport.lock().await;
        let transport = slot.get_or_insert_with(|| self.connector.open());
        let response = match transport.execute(command).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(mut broken) = slot.take() {
                    broken.close().await;
                }
                warn!(error = %e, "script transport failed; reconnecting for the next script");
                return Err(e.into());
            }
        };
        drop(slot);
        if response.is_error() {
            return Err(ScriptError::Failed(response.error_text()));
        }
        let output = script_output(response.result);
        debug!(output = %output, "script finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_output_unwraps_printed_json() {
        let raw = json!({"executed": true, "result": "warming up\n{\"object\": \"mw\", \"faces\": 12}\n"});
        assert_eq!(script_output(Some(raw)), json!({"object": "mw", "faces": 12}));
    }

    #[test]
    fn test_output_keeps_plain_text() {
        let raw = json!({"result": "done"});
        assert_eq!(script_output(Some(raw)), json!("done"));
        assert_eq!(script_output(None), Value::Null);
        assert_eq!(script_output(Some(json!({"a": 1}))), json!({"a": 1}));
    }
}
