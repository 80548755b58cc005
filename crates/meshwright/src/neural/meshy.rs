//! Meshy hosted API.
//!
//! ```text
//! POST /v2/text-to-3d   {"mode": "preview", "prompt": ...}  -> {"result": id}
//! POST /v1/image-to-3d  {"image_url": data-uri}             -> {"result": id}
//! GET  <same path>/{id} -> {"status": "PENDING"|"IN_PROGRESS"|"SUCCEEDED"|
//!                          "FAILED"|"CANCELED", "model_urls": {"glb": url},
//!                          "task_error": {"message": ...}}
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::base::{image_data_uri, poll_until_done, HttpBase, PollOutcome, PollStatus};
use super::{GenerationMode, GenerationRequest, GenerationResult, NeuralProvider, ProviderError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10 * 60);

const TEXT_TO_3D: &str = "/v2/text-to-3d";
const IMAGE_TO_3D: &str = "/v1/image-to-3d";

pub struct MeshyClient {
    base: HttpBase,
}

impl MeshyClient {
    pub fn new(base: HttpBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl NeuralProvider for MeshyClient {
    fn slug(&self) -> &'static str {
        self.base.slug()
    }

    #[tracing::instrument(name = "provider.generate", skip(self, request, cancel), fields(provider = "meshy"))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let started = Instant::now();
        let slug = self.base.slug();

        if !self.base.has_api_key() {
            return Err(ProviderError::NotConfigured(slug.to_string()));
        }

        let (path, body) = match request.effective_mode() {
            GenerationMode::TextTo3d => {
                let prompt = request.prompt.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug.to_string(),
                    what: "a text prompt",
                })?;
                (TEXT_TO_3D, json!({"mode": "preview", "prompt": prompt}))
            }
            GenerationMode::ImageTo3d => {
                let image = request.image_path.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug.to_string(),
                    what: "an input image",
                })?;
                (IMAGE_TO_3D, json!({"image_url": image_data_uri(image).await?}))
            }
            mode => {
                return Err(ProviderError::UnsupportedMode {
                    provider: slug.to_string(),
                    mode,
                })
            }
        };

        let submitted = self.base.post_json(path, &body).await?;
        let task_id = submitted["result"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode {
                provider: slug.to_string(),
                message: "submit response has no result id".to_string(),
            })?
            .to_string();
        info!(provider = slug, job.id = %task_id, "generation submitted");

        let task_path = format!("{}/{}", path, task_id);
        let outcome = poll_until_done(self.base.poll_interval, self.base.deadline, cancel, || async {
            let task = self.base.get_json(&task_path).await?;
            Ok(match task["status"].as_str().unwrap_or("PENDING") {
                "SUCCEEDED" => match task["model_urls"]["glb"].as_str() {
                    Some(url) => PollStatus::Done(url.to_string()),
                    None => PollStatus::Failed("task succeeded without a glb url".to_string()),
                },
                "FAILED" | "CANCELED" | "EXPIRED" => PollStatus::Failed(
                    task["task_error"]["message"]
                        .as_str()
                        .filter(|m| !m.is_empty())
                        .unwrap_or("generation failed")
                        .to_string(),
                ),
                _ => PollStatus::Pending,
            })
        })
        .await?;

        let result = match outcome {
            PollOutcome::Done(url) => {
                let path = self.base.download_artifact(&url, "glb").await?;
                GenerationResult::completed(slug, path, started)
            }
            PollOutcome::Failed(message) => GenerationResult::failed(slug, message, started),
            PollOutcome::TimedOut => GenerationResult::failed(
                slug,
                format!("failed, timed out after {}s", self.base.deadline.as_secs()),
                started,
            ),
            PollOutcome::Cancelled => GenerationResult::failed(slug, "cancelled", started),
        };
        Ok(result.with_job_id(task_id))
    }

    async fn health_check(&self) -> bool {
        self.base.has_api_key()
    }
}
