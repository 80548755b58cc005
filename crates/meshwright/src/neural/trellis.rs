//! Self-hosted TRELLIS server.
//!
//! ```text
//! POST /generate      {prompt?|image?, seed?}  -> {"task_id": "..."}
//! GET  /task/{id}     -> {"status": "pending"|"running"|"done"|"failed",
//!                         "model_url"?, "model_base64"?, "error"?}
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::base::{encode_image_base64, poll_until_done, HttpBase, PollOutcome, PollStatus};
use super::{GenerationMode, GenerationRequest, GenerationResult, NeuralProvider, ProviderError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15 * 60);

enum Artifact {
    Url(String),
    Inline(String),
}

pub struct TrellisClient {
    base: HttpBase,
}

impl TrellisClient {
    pub fn new(base: HttpBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl NeuralProvider for TrellisClient {
    fn slug(&self) -> &'static str {
        self.base.slug()
    }

    #[tracing::instrument(name = "provider.generate", skip(self, request, cancel), fields(provider = "trellis"))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let started = Instant::now();
        let slug = self.base.slug();

        let mut body = match request.effective_mode() {
            GenerationMode::TextTo3d => json!({
                "prompt": request.prompt.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug.to_string(),
                    what: "a text prompt",
                })?
            }),
            GenerationMode::ImageTo3d => {
                let image = request.image_path.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug.to_string(),
                    what: "an input image",
                })?;
                json!({"image": encode_image_base64(image).await?})
            }
            mode => {
                return Err(ProviderError::UnsupportedMode {
                    provider: slug.to_string(),
                    mode,
                })
            }
        };
        if let Some(seed) = request.options.get("seed") {
            body["seed"] = seed.clone();
        }

        let submitted = self.base.post_json("/generate", &body).await?;
        let task_id = submitted["task_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode {
                provider: slug.to_string(),
                message: "submit response has no task_id".to_string(),
            })?
            .to_string();
        info!(provider = slug, job.id = %task_id, "generation submitted");

        let task_path = format!("/task/{}", task_id);
        let outcome = poll_until_done(self.base.poll_interval, self.base.deadline, cancel, || async {
            let task: Value = self.base.get_json(&task_path).await?;
            Ok(match task["status"].as_str().unwrap_or("pending") {
                "done" | "completed" => {
                    if let Some(url) = task["model_url"].as_str() {
                        PollStatus::Done(Artifact::Url(url.to_string()))
                    } else if let Some(b64) = task["model_base64"].as_str() {
                        PollStatus::Done(Artifact::Inline(b64.to_string()))
                    } else {
                        PollStatus::Failed("task finished without a model".to_string())
                    }
                }
                "failed" | "error" => PollStatus::Failed(
                    task["error"].as_str().unwrap_or("generation failed").to_string(),
                ),
                _ => PollStatus::Pending,
            })
        })
        .await?;

        let result = match outcome {
            PollOutcome::Done(Artifact::Url(url)) => {
                let path = self.base.download_artifact(&url, "glb").await?;
                GenerationResult::completed(slug, path, started)
            }
            PollOutcome::Done(Artifact::Inline(b64)) => {
                let path = self.base.persist_base64(&b64, "glb").await?;
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
        self.base.probe("/health").await
    }
}
