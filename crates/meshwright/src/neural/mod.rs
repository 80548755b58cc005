//! Neural 3D generation providers.
//!
//! Every backend implements [`NeuralProvider`]. The [`ProviderRegistry`]
//! knows each backend's static [`ProviderMeta`] up front and builds the
//! client itself only on first use.

pub mod base;
pub mod hunyuan;
pub mod meshy;
pub mod meta;
pub mod partfield;
pub mod registry;
pub mod trellis;
pub mod tripo;

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use meta::{all_meta, meta, ProviderMeta};
pub use registry::{ProviderHealth, ProviderRegistry};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider {0} is not configured (missing url or api key)")]
    NotConfigured(String),

    #[error("no configured provider can serve stage {0}")]
    NoProvider(crate::stage::StageId),

    #[error("provider {provider} does not support {mode:?}")]
    UnsupportedMode {
        provider: String,
        mode: GenerationMode,
    },

    #[error("provider {provider} needs {what}")]
    MissingInput {
        provider: String,
        what: &'static str,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} reported failure: {message}")]
    Remote { provider: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not decode {provider} response: {message}")]
    Decode { provider: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    TextTo3d,
    ImageTo3d,
    MeshTexturing,
    PartSegmentation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// What to generate and from which inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Provider slug. `None` lets the registry choose.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub mode: Option<GenerationMode>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub mesh_path: Option<PathBuf>,
    /// Provider-specific extras merged into the request body.
    #[serde(default)]
    pub options: Value,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            mode: Some(GenerationMode::TextTo3d),
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Some(GenerationMode::ImageTo3d),
            image_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn texture(mesh: impl Into<PathBuf>, prompt: Option<String>) -> Self {
        Self {
            mode: Some(GenerationMode::MeshTexturing),
            mesh_path: Some(mesh.into()),
            prompt,
            ..Default::default()
        }
    }

    pub fn segment(mesh: impl Into<PathBuf>) -> Self {
        Self {
            mode: Some(GenerationMode::PartSegmentation),
            mesh_path: Some(mesh.into()),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, slug: impl Into<String>) -> Self {
        self.provider = Some(slug.into());
        self
    }

    /// Explicit mode, else inferred from the inputs present.
    pub fn effective_mode(&self) -> GenerationMode {
        if let Some(mode) = self.mode {
            return mode;
        }
        match (&self.image_path, &self.mesh_path) {
            (_, Some(_)) => GenerationMode::MeshTexturing,
            (Some(_), None) => GenerationMode::ImageTo3d,
            (None, None) => GenerationMode::TextTo3d,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub provider: String,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_job_id: Option<String>,
    pub duration_ms: u64,
}

impl GenerationResult {
    pub fn completed(provider: &str, output_path: PathBuf, started: Instant) -> Self {
        Self {
            provider: provider.to_string(),
            status: GenerationStatus::Completed,
            output_path: Some(output_path),
            error: None,
            remote_job_id: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn failed(provider: &str, error: impl Into<String>, started: Instant) -> Self {
        Self {
            provider: provider.to_string(),
            status: GenerationStatus::Failed,
            output_path: None,
            error: Some(error.into()),
            remote_job_id: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.remote_job_id = Some(job_id.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == GenerationStatus::Completed && self.output_path.is_some()
    }
}

/// One neural generation backend.
#[async_trait]
pub trait NeuralProvider: Send + Sync {
    fn slug(&self) -> &'static str;

    /// Run one generation. Remote job failures and poll timeouts come back
    /// as a `Failed` result; transport and protocol problems as `Err`.
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError>;

    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_mode_inference() {
        let mut req = GenerationRequest::default();
        assert_eq!(req.effective_mode(), GenerationMode::TextTo3d);
        req.image_path = Some("ref.png".into());
        assert_eq!(req.effective_mode(), GenerationMode::ImageTo3d);
        req.mesh_path = Some("mesh.glb".into());
        assert_eq!(req.effective_mode(), GenerationMode::MeshTexturing);
        req.mode = Some(GenerationMode::PartSegmentation);
        assert_eq!(req.effective_mode(), GenerationMode::PartSegmentation);
    }

    #[test]
    fn test_result_constructors() {
        let started = Instant::now();
        let ok = GenerationResult::completed("trellis", "a.glb".into(), started);
        assert!(ok.is_completed());
        let bad = GenerationResult::failed("trellis", "boom", started).with_job_id("j1");
        assert!(!bad.is_completed());
        assert_eq!(bad.remote_job_id.as_deref(), Some("j1"));
    }
}
