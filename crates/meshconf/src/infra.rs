//! Infrastructure configuration - endpoints and paths fixed for the process lifetime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hard cap for liveness probes against the 3D application.
pub const MAX_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Command listener inside the 3D application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Default: 127.0.0.1
    #[serde(default = "ProtocolConfig::default_host")]
    pub host: String,

    /// Default: 9876
    #[serde(default = "ProtocolConfig::default_port")]
    pub port: u16,

    /// Per-connection timeout for a full command exchange.
    /// Default: 30000
    #[serde(default = "ProtocolConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Timeout for `check` probes, clamped to 5000.
    #[serde(default = "ProtocolConfig::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl ProtocolConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        9876
    }

    fn default_timeout_ms() -> u64 {
        30_000
    }

    fn default_probe_timeout_ms() -> u64 {
        MAX_PROBE_TIMEOUT_MS
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.min(MAX_PROBE_TIMEOUT_MS))
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            timeout_ms: Self::default_timeout_ms(),
            probe_timeout_ms: Self::default_probe_timeout_ms(),
        }
    }
}

/// OpenAI-compatible text generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Default: http://127.0.0.1:11434/v1 (a local Ollama)
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "LlmConfig::default_model")]
    pub model: String,

    #[serde(default = "LlmConfig::default_temperature")]
    pub temperature: f32,

    #[serde(default = "LlmConfig::default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// HTTP timeout for a single generation call.
    #[serde(default = "LlmConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:11434/v1".to_string()
    }

    fn default_model() -> String {
        "qwen2.5:14b".to_string()
    }

    fn default_temperature() -> f32 {
        0.2
    }

    fn default_max_output_tokens() -> u32 {
        4096
    }

    fn default_timeout_ms() -> u64 {
        120_000
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_key: None,
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_output_tokens: Self::default_max_output_tokens(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where generated and downloaded model artifacts land.
    /// Default: ~/.local/share/meshwright/output
    #[serde(default = "PathsConfig::default_output_dir")]
    pub output_dir: PathBuf,
}

impl PathsConfig {
    fn default_output_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/meshwright/output"))
            .unwrap_or_else(|| PathBuf::from(".local/share/meshwright/output"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Empty disables export.
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level or full EnvFilter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure sections of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
