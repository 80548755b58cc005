//! Minimal configuration loading for Meshwright.
//!
//! Configuration is one explicitly constructed value. Every client receives
//! the pieces it needs at construction; nothing reads a process-wide cache.
//!
//! - **Infrastructure** (`InfraConfig`): endpoints and paths fixed for the
//!   process lifetime - the 3D application's command listener, the LLM
//!   endpoint, the output directory, telemetry.
//!
//! - **Bootstrap** (`BootstrapConfig`): neural provider endpoints and
//!   policy defaults (planner retries, tool toggles, pipeline behaviour).
//!
//! # Config File Locations
//!
//! Files are deep-merged in order (later wins):
//! 1. `/etc/meshwright/config.toml` (system)
//! 2. `~/.config/meshwright/config.toml` (user)
//! 3. `./meshwright.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`MESHWRIGHT_*`)
//!
//! # Example Config
//!
//! ```toml
//! [protocol]
//! host = "127.0.0.1"
//! port = 9876
//! timeout_ms = 30000
//!
//! [llm]
//! base_url = "http://127.0.0.1:11434/v1"
//! model = "qwen2.5:14b"
//!
//! [paths]
//! output_dir = "~/.local/share/meshwright/output"
//!
//! [tools]
//! sketchfab = false
//!
//! [providers.hunyuan-shape]
//! url = "http://gpu-box:8081"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{
    default_providers, BootstrapConfig, PipelineConfig, PlannerConfig, ProviderEndpoint,
    ProvidersConfig, ToolsConfig,
};
pub use infra::{InfraConfig, LlmConfig, PathsConfig, ProtocolConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Meshwright configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MeshConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub bootstrap: BootstrapConfig,
}

impl MeshConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./meshwright.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::config_from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# Meshwright Configuration\n\n");

        let protocol = &self.infra.protocol;
        output.push_str("[protocol]\n");
        output.push_str(&format!("host = \"{}\"\n", protocol.host));
        output.push_str(&format!("port = {}\n", protocol.port));
        output.push_str(&format!("timeout_ms = {}\n", protocol.timeout_ms));
        output.push_str(&format!("probe_timeout_ms = {}\n", protocol.probe_timeout_ms));

        let llm = &self.infra.llm;
        output.push_str("\n[llm]\n");
        output.push_str(&format!("base_url = \"{}\"\n", llm.base_url));
        output.push_str(&format!("model = \"{}\"\n", llm.model));
        output.push_str(&format!("temperature = {}\n", llm.temperature));
        output.push_str(&format!("max_output_tokens = {}\n", llm.max_output_tokens));
        output.push_str(&format!("timeout_ms = {}\n", llm.timeout_ms));
        if llm.api_key.is_some() {
            output.push_str("# api_key is set (hidden)\n");
        }

        output.push_str("\n[paths]\n");
        output.push_str(&format!(
            "output_dir = \"{}\"\n",
            self.infra.paths.output_dir.display()
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!("log_level = \"{}\"\n", self.infra.telemetry.log_level));

        output.push_str("\n[planner]\n");
        output.push_str(&format!("max_retries = {}\n", self.bootstrap.planner.max_retries));

        output.push_str("\n[tools]\n");
        output.push_str(&format!("polyhaven = {}\n", self.bootstrap.tools.polyhaven));
        output.push_str(&format!("sketchfab = {}\n", self.bootstrap.tools.sketchfab));

        let pipeline = &self.bootstrap.pipeline;
        output.push_str("\n[pipeline]\n");
        output.push_str(&format!("graceful_degradation = {}\n", pipeline.graceful_degradation));
        output.push_str(&format!("export_format = \"{}\"\n", pipeline.export_format));
        output.push_str(&format!("target_faces = {}\n", pipeline.target_faces));

        for (slug, endpoint) in &self.bootstrap.providers {
            output.push_str(&format!("\n[providers.{}]\n", slug));
            output.push_str(&format!("url = \"{}\"\n", endpoint.url));
            if let Some(ms) = endpoint.poll_interval_ms {
                output.push_str(&format!("poll_interval_ms = {}\n", ms));
            }
            if let Some(secs) = endpoint.timeout_secs {
                output.push_str(&format!("timeout_secs = {}\n", secs));
            }
            if endpoint.api_key.is_some() {
                output.push_str("# api_key is set (hidden)\n");
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.infra.protocol.port, 9876);
        assert!(!config.bootstrap.providers.is_empty());
    }

    #[test]
    fn test_to_toml_roundtrips_through_loader() {
        let mut config = MeshConfig::default();
        config.infra.protocol.port = 9100;
        config.bootstrap.providers.get_mut("tripo").unwrap().api_key = Some("secret".into());

        let rendered = config.to_toml();
        assert!(rendered.contains("[protocol]"));
        assert!(rendered.contains("[providers.hunyuan-shape]"));
        assert!(!rendered.contains("secret"));

        let table: toml::Table = rendered.parse().unwrap();
        let reparsed = loader::config_from_table(table, Path::new("rendered")).unwrap();
        assert_eq!(reparsed.infra.protocol.port, 9100);
        assert_eq!(reparsed.bootstrap.providers["tripo"].api_key, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[protocol]\nport = 9321\n").unwrap();

        let (config, sources) = MeshConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(sources.files.last(), Some(&path));
        // Env may still override in CI, so only check the file was honoured when untouched
        if !sources.env_overrides.iter().any(|k| k == "MESHWRIGHT_PROTOCOL_PORT") {
            assert_eq!(config.infra.protocol.port, 9321);
        }
    }
}
