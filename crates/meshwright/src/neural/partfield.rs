//! Self-hosted PartField segmentation server. Synchronous: the response
//! body is the segmented GLB.
//!
//! ```text
//! POST /segment   {"mesh": base64, "num_parts"?: n}  -> model/gltf-binary
//! ```

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::base::{encode_file_base64, HttpBase};
use super::{GenerationMode, GenerationRequest, GenerationResult, NeuralProvider, ProviderError};

pub struct PartfieldClient {
    base: HttpBase,
}

impl PartfieldClient {
    pub fn new(base: HttpBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl NeuralProvider for PartfieldClient {
    fn slug(&self) -> &'static str {
        self.base.slug()
    }

    #[tracing::instrument(name = "provider.generate", skip(self, request, cancel), fields(provider = "partfield"))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let started = Instant::now();
        let slug = self.base.slug();

        let mode = request.effective_mode();
        if mode != GenerationMode::PartSegmentation {
            return Err(ProviderError::UnsupportedMode {
                provider: slug.to_string(),
                mode,
            });
        }
        let mesh = request.mesh_path.as_deref().ok_or(ProviderError::MissingInput {
            provider: slug.to_string(),
            what: "an input mesh",
        })?;

        let mut body = json!({"mesh": encode_file_base64(mesh).await?});
        if let Some(parts) = request.options.get("num_parts") {
            body["num_parts"] = parts.clone();
        }

        let call = tokio::time::timeout(self.base.deadline, self.base.post_for_bytes("/segment", &body));
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(GenerationResult::failed(slug, "cancelled", started)),
            bytes = call => match bytes {
                Ok(bytes) => bytes?,
                Err(_) => {
                    return Ok(GenerationResult::failed(
                        slug,
                        format!("failed, timed out after {}s", self.base.deadline.as_secs()),
                        started,
                    ))
                }
            },
        };
        if bytes.is_empty() {
            return Ok(GenerationResult::failed(slug, "empty segmentation result", started));
        }

        let path = self.base.persist_bytes(&bytes, "glb").await?;
        Ok(GenerationResult::completed(slug, path, started))
    }

    async fn health_check(&self) -> bool {
        self.base.probe("/health").await
    }
}
