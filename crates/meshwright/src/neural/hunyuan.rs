//! Self-hosted Hunyuan3D servers: shape generation and mesh painting.
//!
//! Both speak the same job API:
//!
//! ```text
//! POST /send            {text?|image?|mesh?, ...}  -> {"uid": "..."}
//! GET  /status/{uid}    -> {"status": "processing" | "completed" | "error",
//!                           "model_base64"?: "...", "message"?: "..."}
//! GET  /health
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::base::{encode_file_base64, encode_image_base64, poll_until_done, HttpBase, PollOutcome, PollStatus};
use super::{GenerationMode, GenerationRequest, GenerationResult, NeuralProvider, ProviderError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunyuanKind {
    Shape,
    Paint,
}

pub struct HunyuanClient {
    base: HttpBase,
    kind: HunyuanKind,
}

impl HunyuanClient {
    pub fn new(base: HttpBase, kind: HunyuanKind) -> Self {
        Self { base, kind }
    }

    async fn build_body(&self, request: &GenerationRequest) -> Result<Value, ProviderError> {
        let slug = self.base.slug().to_string();
        let mode = request.effective_mode();
        let mut body = json!({});

        match (self.kind, mode) {
            (HunyuanKind::Shape, GenerationMode::TextTo3d) => {
                let prompt = request.prompt.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug,
                    what: "a text prompt",
                })?;
                body["text"] = json!(prompt);
            }
            (HunyuanKind::Shape, GenerationMode::ImageTo3d) => {
                let image = request.image_path.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug,
                    what: "an input image",
                })?;
                body["image"] = json!(encode_image_base64(image).await?);
            }
            (HunyuanKind::Paint, GenerationMode::MeshTexturing) => {
                let mesh = request.mesh_path.as_deref().ok_or(ProviderError::MissingInput {
                    provider: slug,
                    what: "an input mesh",
                })?;
                body["mesh"] = json!(encode_file_base64(mesh).await?);
                body["texture"] = json!(true);
                if let Some(image) = request.image_path.as_deref() {
                    body["image"] = json!(encode_image_base64(image).await?);
                }
                if let Some(prompt) = &request.prompt {
                    body["text"] = json!(prompt);
                }
            }
            (_, mode) => {
                return Err(ProviderError::UnsupportedMode {
                    provider: slug,
                    mode,
                })
            }
        }

        if let (Value::Object(extra), Value::Object(target)) = (&request.options, &mut body) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl NeuralProvider for HunyuanClient {
    fn slug(&self) -> &'static str {
        self.base.slug()
    }

    #[tracing::instrument(name = "provider.generate", skip(self, request, cancel), fields(provider = self.base.slug()))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let started = Instant::now();
        let slug = self.base.slug();
        let body = self.build_body(request).await?;

        let submitted = self.base.post_json("/send", &body).await?;
        let uid = submitted["uid"]
            .as_str()
            .ok_or_else(|| ProviderError::Decode {
                provider: slug.to_string(),
                message: "submit response has no uid".to_string(),
            })?
            .to_string();
        info!(provider = slug, job.id = %uid, "generation submitted");

        let status_path = format!("/status/{}", uid);
        let outcome = poll_until_done(self.base.poll_interval, self.base.deadline, cancel, || async {
            let status = self.base.get_json(&status_path).await?;
            Ok(match status["status"].as_str().unwrap_or("processing") {
                "completed" => match status["model_base64"].as_str() {
                    Some(b64) => PollStatus::Done(b64.to_string()),
                    None => PollStatus::Failed("completed without model_base64".to_string()),
                },
                "error" | "failed" => PollStatus::Failed(
                    status["message"].as_str().unwrap_or("generation failed").to_string(),
                ),
                _ => PollStatus::Pending,
            })
        })
        .await?;

        let result = match outcome {
            PollOutcome::Done(b64) => {
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
        Ok(result.with_job_id(uid))
    }

    async fn health_check(&self) -> bool {
        self.base.probe("/health").await
    }
}
