//! Tripo hosted API. Text-to-3D only.
//!
//! ```text
//! POST /task        {"type": "text_to_model", "prompt": ...}
//!                   -> {"code": 0, "data": {"task_id": "..."}}
//! GET  /task/{id}   -> {"code": 0, "data": {"status": "queued"|"running"|"success"|
//!                       "failed"|"cancelled", "output": {"model": url}}}
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::base::{poll_until_done, HttpBase, PollOutcome, PollStatus};
use super::{GenerationMode, GenerationRequest, GenerationResult, NeuralProvider, ProviderError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

pub struct TripoClient {
    base: HttpBase,
}

impl TripoClient {
    pub fn new(base: HttpBase) -> Self {
        Self { base }
    }

    /// Unwrap the `{code, data}` envelope. A non-zero code is a remote error.
    fn data(&self, envelope: Value) -> Result<Value, ProviderError> {
        let code = envelope["code"].as_i64().unwrap_or(0);
        if code != 0 {
            return Err(ProviderError::Remote {
                provider: self.base.slug().to_string(),
                message: envelope["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("error code {}", code)),
            });
        }
        Ok(envelope["data"].clone())
    }
}

#[async_trait]
impl NeuralProvider for TripoClient {
    fn slug(&self) -> &'static str {
        self.base.slug()
    }

    #[tracing::instrument(name = "provider.generate", skip(self, request, cancel), fields(provider = "tripo"))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let started = Instant::now();
        let slug = self.base.slug();

        let mode = request.effective_mode();
        if mode != GenerationMode::TextTo3d {
            return Err(ProviderError::UnsupportedMode {
                provider: slug.to_string(),
                mode,
            });
        }
        if !self.base.has_api_key() {
            return Err(ProviderError::NotConfigured(slug.to_string()));
        }
        let prompt = request.prompt.as_deref().ok_or(ProviderError::MissingInput {
            provider: slug.to_string(),
            what: "a text prompt",
        })?;

        let submitted = self
            .base
            .post_json("/task", &json!({"type": "text_to_model", "prompt": prompt}))
            .await?;
        let data = self.data(submitted)?;
        let task_id = data["task_id"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode {
                provider: slug.to_string(),
                message: "submit response has no task_id".to_string(),
            })?
            .to_string();
        info!(provider = slug, job.id = %task_id, "generation submitted");

        let task_path = format!("/task/{}", task_id);
        let outcome = poll_until_done(self.base.poll_interval, self.base.deadline, cancel, || async {
            let data = self.data(self.base.get_json(&task_path).await?)?;
            Ok(match data["status"].as_str().unwrap_or("queued") {
                "success" => match data["output"]["model"].as_str() {
                    Some(url) => PollStatus::Done(url.to_string()),
                    None => PollStatus::Failed("task succeeded without a model url".to_string()),
                },
                "failed" | "cancelled" | "banned" | "expired" => {
                    PollStatus::Failed(format!("task {}", data["status"].as_str().unwrap_or("failed")))
                }
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

    /// Hosted service: configured with a key counts as healthy.
    async fn health_check(&self) -> bool {
        self.base.has_api_key()
    }
}
