//! Command and Response payloads.
//!
//! ## Wire Format
//!
//! ```text
//! request:  {"id": "...", "type": "get_scene_info", "params": {...}}\n
//! response: {"status": "ok", "result": {...}}          (no terminator)
//! ```
//!
//! Responses carry no length prefix. See [`crate::frame`] for how the end of
//! a response is detected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One remote operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub params: Value,
}

impl Command {
    /// Create a command with a fresh UUID.
    pub fn new(command_type: impl Into<String>, params: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), command_type, params)
    }

    pub fn with_id(id: impl Into<String>, command_type: impl Into<String>, params: Value) -> Self {
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        Self {
            id: id.into(),
            command_type: command_type.into(),
            params,
        }
    }

    /// Newline-terminated JSON bytes ready for the socket.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Success,
    Error,
}

/// A parsed reply. `raw` always holds the text as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub raw: String,
}

impl Response {
    /// Parse a complete frame. Never fails: bad payloads become `status: error`.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(buf).trim().to_string();

        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => return Self::invalid(raw, format!("invalid response payload: {}", e)),
        };

        let Some(obj) = value.as_object() else {
            return Self::invalid(raw, "invalid response payload: not a JSON object".to_string());
        };

        let error_text = obj.get("error").and_then(|v| v.as_str()).map(String::from);

        let status = match obj.get("status").and_then(|v| v.as_str()) {
            Some("ok") => ResponseStatus::Ok,
            Some("success") => ResponseStatus::Success,
            Some("error") => ResponseStatus::Error,
            Some(_) => ResponseStatus::Error,
            None if error_text.is_some() => ResponseStatus::Error,
            None => ResponseStatus::Ok,
        };

        let message = obj
            .get("message")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or(error_text);

        Self {
            status,
            result: obj.get("result").cloned(),
            message,
            raw,
        }
    }

    fn invalid(raw: String, message: String) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            message: Some(message),
            raw,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    pub fn is_ok(&self) -> bool {
        !self.is_error()
    }

    /// True when the payload was a JSON object shaped like a protocol reply.
    pub fn is_protocol_payload(&self) -> bool {
        serde_json::from_str::<Value>(&self.raw)
            .ok()
            .and_then(|v| {
                v.as_object()
                    .map(|o| o.contains_key("status") || o.contains_key("result"))
            })
            .unwrap_or(false)
    }

    /// Error text, falling back to the raw payload.
    pub fn error_text(&self) -> String {
        self.message.clone().unwrap_or_else(|| self.raw.clone())
    }
}
