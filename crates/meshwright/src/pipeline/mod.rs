//! Hybrid pipeline: neural generation followed by scripted post-processing
//! inside the 3D application.
//!
//! Stages run strictly in [`StageId::ALL`] order and every stage ends up in
//! the ledger, including the ones that never ran. Neural stages resolve a
//! provider through the [`ProviderRegistry`]; script stages hand Python
//! payloads to an injected [`ScriptExecutor`]. Each stage's artifact feeds
//! the next.

pub mod payloads;
pub mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use meshconf::MeshConfig;

use crate::neural::{GenerationRequest, ProviderRegistry};
use crate::stage::StageId;

pub use payloads::{AnimationPreset, ExportFormat};
pub use script::{ProtocolScriptExecutor, ScriptError, ScriptExecutor, EXECUTE_CODE};

const DEFAULT_ANIMATION_FRAMES: u32 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Skipped | StageStatus::Failed
        )
    }
}

/// One row of the stage ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: StageId,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub duration_ms: u64,
}

impl StageRecord {
    fn pending(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            provider: None,
            artifact: None,
            output: None,
            error: None,
            skip_reason: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Every stage ended `completed` or `skipped`, and the run was not cancelled.
    pub success: bool,
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub cancelled: bool,
}

impl PipelineResult {
    pub fn stage(&self, stage: StageId) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Record a failed stage and keep going instead of aborting the run.
    pub graceful_degradation: bool,
    /// Reference image for image-conditioned geometry and texturing.
    pub image_path: Option<PathBuf>,
    pub geometry_provider: Option<String>,
    pub texture_provider: Option<String>,
    pub segmentation: bool,
    pub rigging: bool,
    pub animation: Option<AnimationPreset>,
    pub animation_frames: u32,
    pub target_faces: u32,
    pub export_format: ExportFormat,
    pub output_dir: PathBuf,
    /// Scene name for the imported object; generated when unset.
    pub object_name: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let defaults = meshconf::PipelineConfig::default();
        Self {
            graceful_degradation: defaults.graceful_degradation,
            image_path: None,
            geometry_provider: None,
            texture_provider: None,
            segmentation: false,
            rigging: false,
            animation: None,
            animation_frames: DEFAULT_ANIMATION_FRAMES,
            target_faces: defaults.target_faces,
            export_format: ExportFormat::default(),
            output_dir: meshconf::PathsConfig::default().output_dir,
            object_name: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &MeshConfig) -> Self {
        let pipeline = &config.bootstrap.pipeline;
        let export_format = pipeline.export_format.parse().unwrap_or_else(|e| {
            warn!(error = %e, "falling back to glb export");
            ExportFormat::Glb
        });
        Self {
            graceful_degradation: pipeline.graceful_degradation,
            target_faces: pipeline.target_faces,
            export_format,
            output_dir: config.infra.paths.output_dir.clone(),
            ..Self::default()
        }
    }

    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation = enabled;
        self
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_segmentation(mut self, enabled: bool) -> Self {
        self.segmentation = enabled;
        self
    }

    pub fn with_rigging(mut self, enabled: bool) -> Self {
        self.rigging = enabled;
        self
    }

    pub fn with_animation(mut self, preset: Option<AnimationPreset>) -> Self {
        self.animation = preset;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_object_name(mut self, name: impl Into<String>) -> Self {
        self.object_name = Some(name.into());
        self
    }

    fn stage_requested(&self, stage: StageId) -> bool {
        match stage {
            StageId::Segmentation => self.segmentation,
            StageId::Rigging => self.rigging,
            StageId::Animation => self.animation.is_some(),
            _ => true,
        }
    }
}

/// Observer for stage status transitions.
pub type ProgressFn<'a> = &'a (dyn Fn(&StageRecord) + Send + Sync);

/// What a successful stage hands back to the ledger.
#[derive(Default)]
struct StageOutcome {
    provider: Option<String>,
    artifact: Option<PathBuf>,
    output: Option<Value>,
}

struct StageFailure {
    provider: Option<String>,
    error: String,
}

impl StageFailure {
    fn new(provider: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.map(str::to_string),
            error: error.into(),
        }
    }
}

impl From<ScriptError> for StageFailure {
    fn from(e: ScriptError) -> Self {
        StageFailure::new(None, e.to_string())
    }
}

/// Artifacts threaded between stages.
struct RunState {
    object_name: String,
    artifact: Option<PathBuf>,
    scene_object: Option<String>,
    export_path: Option<PathBuf>,
}

pub struct HybridPipeline {
    registry: Arc<ProviderRegistry>,
    scripts: Option<Arc<dyn ScriptExecutor>>,
}

impl HybridPipeline {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            scripts: None,
        }
    }

    pub fn with_script_executor(mut self, scripts: Arc<dyn ScriptExecutor>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Run all ten stages for `request`. Never fails as a whole: problems are
    /// recorded per stage.
    #[tracing::instrument(name = "pipeline.run", skip_all, fields(graceful = options.graceful_degradation))]
    pub async fn run(
        &self,
        request: &str,
        options: &PipelineOptions,
        on_progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let started = Instant::now();
        let report = |record: &StageRecord| {
            if let Some(callback) = on_progress {
                callback(record);
            }
        };

        let mut state = RunState {
            object_name: options.object_name.clone().unwrap_or_else(|| {
                format!("meshwright_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
            }),
            artifact: None,
            scene_object: None,
            export_path: None,
        };
        let mut stages: Vec<StageRecord> = StageId::ALL.iter().map(|s| StageRecord::pending(*s)).collect();
        let mut halted: Option<String> = None;
        let mut cancelled = false;

        for record in stages.iter_mut() {
            let stage = record.stage;

            if halted.is_none() && cancel.is_cancelled() {
                cancelled = true;
                halted = Some("cancelled".to_string());
            }
            let skip_reason = halted
                .clone()
                .or_else(|| self.skip_reason(stage, options, &state));
            if let Some(reason) = skip_reason {
                record.status = StageStatus::Skipped;
                record.skip_reason = Some(reason);
                report(&*record);
                continue;
            }

            record.status = StageStatus::Running;
            report(&*record);

            let stage_started = Instant::now();
            let span = info_span!("pipeline.stage", stage = %stage);
            let outcome = self
                .run_stage(stage, request, options, &mut state, cancel)
                .instrument(span)
                .await;
            record.duration_ms = stage_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(done) => {
                    record.status = StageStatus::Completed;
                    record.provider = done.provider;
                    record.artifact = done.artifact;
                    record.output = done.output;
                    info!(%stage, duration_ms = record.duration_ms, "stage completed");
                }
                Err(failure) => {
                    record.status = StageStatus::Failed;
                    record.provider = failure.provider;
                    record.error = Some(failure.error);
                    warn!(%stage, error = ?record.error, "stage failed");
                    if !options.graceful_degradation {
                        halted = Some(format!("aborted after {} failed", stage));
                    }
                }
            }
            report(&*record);
        }

        let success = !cancelled
            && stages
                .iter()
                .all(|r| matches!(r.status, StageStatus::Completed | StageStatus::Skipped));
        let output_path = match (&self.scripts, state.export_path) {
            (Some(_), export) => export,
            (None, _) => state.artifact,
        };

        PipelineResult {
            success,
            stages,
            output_path,
            total_duration_ms: started.elapsed().as_millis() as u64,
            cancelled,
        }
    }

    /// Why `stage` cannot run given what earlier stages produced.
    fn skip_reason(&self, stage: StageId, options: &PipelineOptions, state: &RunState) -> Option<String> {
        if !options.stage_requested(stage) {
            return Some(format!("{} not requested", stage));
        }
        match stage {
            StageId::Geometry => None,
            StageId::Texturing => state
                .artifact
                .is_none()
                .then(|| "no geometry artifact to texture".to_string()),
            StageId::Import if state.artifact.is_none() => Some("no model artifact to import".to_string()),
            _ if self.scripts.is_none() => Some("no script executor configured".to_string()),
            s if s.needs_scene_object() && state.scene_object.is_none() => {
                Some("no imported scene object".to_string())
            }
            _ => None,
        }
    }

    async fn run_stage(
        &self,
        stage: StageId,
        request: &str,
        options: &PipelineOptions,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, StageFailure> {
        match stage {
            StageId::Geometry => {
                let mut generation = match &options.image_path {
                    Some(image) => GenerationRequest::image(image.clone()),
                    None => GenerationRequest::text(request),
                };
                generation.prompt = Some(request.to_string());
                let outcome = self
                    .generate(stage, generation, options.geometry_provider.as_deref(), cancel)
                    .await?;
                state.artifact = outcome.artifact.clone();
                Ok(outcome)
            }
            StageId::Texturing => {
                let mesh = self.current_artifact(state)?;
                let mut generation = GenerationRequest::texture(mesh, Some(request.to_string()));
                generation.image_path = options.image_path.clone();
                let outcome = self
                    .generate(stage, generation, options.texture_provider.as_deref(), cancel)
                    .await?;
                state.artifact = outcome.artifact.clone();
                Ok(outcome)
            }
            StageId::Import => {
                let artifact = self.current_artifact(state)?;
                let output = self
                    .script(&payloads::import_model(&artifact, &state.object_name))
                    .await?;
                let object = output
                    .get("object")
                    .and_then(Value::as_str)
                    .unwrap_or(state.object_name.as_str())
                    .to_string();
                state.object_name = object.clone();
                state.scene_object = Some(object);
                Ok(StageOutcome {
                    output: Some(output),
                    ..Default::default()
                })
            }
            StageId::Cleanup => self.script_stage(&payloads::cleanup(&state.object_name)).await,
            StageId::Retopology => {
                self.script_stage(&payloads::retopology(&state.object_name, options.target_faces))
                    .await
            }
            StageId::UvUnwrap => self.script_stage(&payloads::uv_unwrap(&state.object_name)).await,
            StageId::Segmentation => self.segment(state, options, cancel).await,
            StageId::Rigging => self.script_stage(&payloads::auto_rig(&state.object_name)).await,
            StageId::Animation => {
                let preset = options.animation.unwrap_or_default();
                self.script_stage(&payloads::animate(
                    &state.object_name,
                    preset,
                    options.animation_frames,
                ))
                .await
            }
            StageId::Export => {
                let path = options.output_dir.join(format!(
                    "{}.{}",
                    state.object_name,
                    options.export_format.extension()
                ));
                let output = self
                    .script(&payloads::export_object(&state.object_name, &path, options.export_format))
                    .await?;
                state.export_path = Some(path.clone());
                state.artifact = Some(path.clone());
                Ok(StageOutcome {
                    artifact: Some(path),
                    output: Some(output),
                    ..Default::default()
                })
            }
        }
    }

    fn current_artifact(&self, state: &RunState) -> Result<PathBuf, StageFailure> {
        state
            .artifact
            .clone()
            .ok_or_else(|| StageFailure::new(None, "no artifact from earlier stages"))
    }

    /// Resolve a provider up front so the ledger names it even on failure.
    async fn generate(
        &self,
        stage: StageId,
        request: GenerationRequest,
        preferred: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, StageFailure> {
        let meta = self
            .registry
            .select_best_provider(stage, preferred)
            .ok_or_else(|| StageFailure::new(preferred, format!("no configured provider for {}", stage)))?;
        let slug = Some(meta.slug);

        let result = self
            .registry
            .generate(stage, &request.with_provider(meta.slug), cancel)
            .await
            .map_err(|e| StageFailure::new(slug, e.to_string()))?;

        let completed = result.is_completed();
        match result.output_path {
            Some(path) if completed => Ok(StageOutcome {
                provider: Some(result.provider),
                artifact: Some(path),
                output: result.remote_job_id.map(|id| serde_json::json!({"jobId": id})),
            }),
            _ => Err(StageFailure::new(
                slug,
                result.error.unwrap_or_else(|| "provider returned no artifact".to_string()),
            )),
        }
    }

    async fn script(&self, code: &str) -> Result<Value, StageFailure> {
        let scripts = self
            .scripts
            .as_ref()
            .ok_or_else(|| StageFailure::new(None, "no script executor configured"))?;
        Ok(scripts.run_script(code).await?)
    }

    async fn script_stage(&self, code: &str) -> Result<StageOutcome, StageFailure> {
        let output = self.script(code).await?;
        Ok(StageOutcome {
            output: Some(output),
            ..Default::default()
        })
    }

    /// Export the scene object, split it into parts with a segmentation
    /// provider, and swap the segmented model back in under the same name.
    async fn segment(
        &self,
        state: &mut RunState,
        options: &PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, StageFailure> {
        let source = options.output_dir.join(format!(
            "{}-presegment-{}.glb",
            state.object_name,
            uuid::Uuid::new_v4().simple()
        ));
        self.script(&payloads::export_object(&state.object_name, &source, ExportFormat::Glb))
            .await?;

        let mut outcome = self
            .generate(StageId::Segmentation, GenerationRequest::segment(source), None, cancel)
            .await?;
        if let Some(segmented) = &outcome.artifact {
            let output = self
                .script(&payloads::import_model(segmented, &state.object_name))
                .await
                .map_err(|f| StageFailure {
                    provider: outcome.provider.clone(),
                    error: f.error,
                })?;
            outcome.output = Some(output);
            state.artifact = Some(segmented.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_stages_follow_flags() {
        let options = PipelineOptions::default();
        assert!(!options.stage_requested(StageId::Segmentation));
        assert!(!options.stage_requested(StageId::Animation));
        assert!(options.stage_requested(StageId::Export));

        let options = options
            .with_rigging(true)
            .with_animation(Some(AnimationPreset::Idle));
        assert!(options.stage_requested(StageId::Rigging));
        assert!(options.stage_requested(StageId::Animation));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = MeshConfig::default();
        config.bootstrap.pipeline.export_format = "FBX".to_string();
        config.bootstrap.pipeline.graceful_degradation = false;
        let options = PipelineOptions::from_config(&config);
        assert_eq!(options.export_format, ExportFormat::Fbx);
        assert!(!options.graceful_degradation);

        config.bootstrap.pipeline.export_format = "usdz".to_string();
        assert_eq!(PipelineOptions::from_config(&config).export_format, ExportFormat::Glb);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
    }
}
