//! Bootstrap configuration - seeds runtime policy and provider endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Neural provider endpoints keyed by provider slug.
pub type ProvidersConfig = BTreeMap<String, ProviderEndpoint>;

/// Where a neural generation backend lives and how patiently to poll it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Base URL. Empty leaves the provider unconfigured.
    #[serde(default)]
    pub url: String,

    /// Bearer token for third-party APIs.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override of the provider's poll interval.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Override of the provider's hard wall-clock deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderEndpoint {
    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Default provider endpoints for bootstrap.
pub fn default_providers() -> ProvidersConfig {
    let mut providers = BTreeMap::new();
    providers.insert("hunyuan-shape".to_string(), ProviderEndpoint::at("http://127.0.0.1:8081"));
    providers.insert("hunyuan-paint".to_string(), ProviderEndpoint::at("http://127.0.0.1:8082"));
    providers.insert("trellis".to_string(), ProviderEndpoint::at("http://127.0.0.1:8083"));
    providers.insert("partfield".to_string(), ProviderEndpoint::at("http://127.0.0.1:8084"));
    providers.insert("tripo".to_string(), ProviderEndpoint::at("https://api.tripo3d.ai/v2/openapi"));
    providers.insert("meshy".to_string(), ProviderEndpoint::at("https://api.meshy.ai/openapi"));
    providers
}

/// Planner policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Extra attempts after the first schema-invalid plan.
    #[serde(default = "PlannerConfig::default_max_retries")]
    pub max_retries: u32,
}

impl PlannerConfig {
    fn default_max_retries() -> u32 {
        1
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
        }
    }
}

/// Project-level toggles for asset-provider tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "ToolsConfig::default_polyhaven")]
    pub polyhaven: bool,

    #[serde(default)]
    pub sketchfab: bool,
}

impl ToolsConfig {
    fn default_polyhaven() -> bool {
        true
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            polyhaven: Self::default_polyhaven(),
            sketchfab: false,
        }
    }
}

/// Hybrid pipeline defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_graceful_degradation")]
    pub graceful_degradation: bool,

    /// glb, fbx or obj
    #[serde(default = "PipelineConfig::default_export_format")]
    pub export_format: String,

    /// Face budget for the retopology stage.
    #[serde(default = "PipelineConfig::default_target_faces")]
    pub target_faces: u32,
}

impl PipelineConfig {
    fn default_graceful_degradation() -> bool {
        true
    }

    fn default_export_format() -> String {
        "glb".to_string()
    }

    fn default_target_faces() -> u32 {
        20_000
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            graceful_degradation: Self::default_graceful_degradation(),
            export_format: Self::default_export_format(),
            target_faces: Self::default_target_faces(),
        }
    }
}

/// Bootstrap configuration - seeds runtime, then runtime owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_providers")]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl BootstrapConfig {
    /// Fill missing provider slugs and blank URLs from the built-in table.
    pub fn fill_provider_defaults(&mut self) {
        for (slug, default) in default_providers() {
            let entry = self.providers.entry(slug).or_default();
            if entry.url.is_empty() {
                entry.url = default.url;
            }
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            planner: PlannerConfig::default(),
            tools: ToolsConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_providers() {
        let providers = default_providers();
        assert_eq!(providers.len(), 6);
        assert_eq!(providers["hunyuan-shape"].url, "http://127.0.0.1:8081");
        assert!(providers["tripo"].api_key.is_none());
    }

    #[test]
    fn test_fill_provider_defaults_keeps_overrides() {
        let mut bootstrap = BootstrapConfig {
            providers: BTreeMap::new(),
            ..Default::default()
        };
        bootstrap.providers.insert(
            "tripo".to_string(),
            ProviderEndpoint {
                api_key: Some("tsk_123".to_string()),
                ..Default::default()
            },
        );
        bootstrap.providers.insert("trellis".to_string(), ProviderEndpoint::at("http://gpu:9000"));

        bootstrap.fill_provider_defaults();

        assert_eq!(bootstrap.providers.len(), 6);
        assert_eq!(bootstrap.providers["tripo"].url, "https://api.tripo3d.ai/v2/openapi");
        assert_eq!(bootstrap.providers["tripo"].api_key.as_deref(), Some("tsk_123"));
        assert_eq!(bootstrap.providers["trellis"].url, "http://gpu:9000");
    }

    #[test]
    fn test_policy_defaults() {
        let bootstrap = BootstrapConfig::default();
        assert_eq!(bootstrap.planner.max_retries, 1);
        assert!(bootstrap.tools.polyhaven);
        assert!(!bootstrap.tools.sketchfab);
        assert!(bootstrap.pipeline.graceful_degradation);
        assert_eq!(bootstrap.pipeline.export_format, "glb");
    }
}
