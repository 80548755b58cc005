//! Drives individual workflow steps through their lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{RecommendedTool, StepCategory, StepStatus, WorkflowProposal, WorkflowStep};
use crate::executor::Executor;
use crate::neural::{GenerationRequest, ProviderRegistry};
use crate::planner::Planner;
use crate::stage::StageId;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow has no step {0}")]
    UnknownStep(usize),

    #[error("step {index} is {from:?}; cannot {action}")]
    InvalidTransition {
        index: usize,
        from: StepStatus,
        action: &'static str,
    },

    #[error("step {0} is a manual step; mark it done instead")]
    ManualStep(usize),
}

/// Hands `execute` to the planner/executor or the provider registry.
/// `skip` and `manual_done` are bookkeeping only.
pub struct WorkflowRunner {
    planner: Planner,
    executor: Executor,
    registry: Arc<ProviderRegistry>,
}

impl WorkflowRunner {
    pub fn new(planner: Planner, executor: Executor, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            planner,
            executor,
            registry,
        }
    }

    /// Run one step. Its outcome lands in the step itself; `Err` only for
    /// steps that cannot be executed at all.
    #[tracing::instrument(name = "workflow.execute", skip(self, proposal, cancel))]
    pub async fn execute(
        &self,
        proposal: &mut WorkflowProposal,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<StepStatus, WorkflowError> {
        let prior_mesh = latest_artifact(&proposal.steps[..index.min(proposal.steps.len())]);
        let request = proposal.request.clone();
        let step = step_mut(proposal, index)?;
        if !matches!(step.status, StepStatus::Pending | StepStatus::Failed) {
            return Err(WorkflowError::InvalidTransition {
                index,
                from: step.status,
                action: "execute",
            });
        }
        if step.recommended_tool == RecommendedTool::Manual {
            return Err(WorkflowError::ManualStep(index));
        }

        step.status = StepStatus::Running;
        step.error = None;
        let prompt = format!(
            "{}\nCurrent step: {}. {}",
            request, step.title, step.description
        );

        let outcome = match step.recommended_tool {
            RecommendedTool::Neural => self.run_neural(step, &prompt, prior_mesh, cancel).await,
            _ => self.run_procedural(&prompt, cancel).await,
        };
        match outcome {
            Ok(result) => {
                step.status = StepStatus::Completed;
                step.result = Some(result);
            }
            Err(error) => {
                step.status = StepStatus::Failed;
                step.error = Some(error);
            }
        }
        info!(index, status = ?step.status, "workflow step finished");
        Ok(step.status)
    }

    pub fn skip(&self, proposal: &mut WorkflowProposal, index: usize) -> Result<StepStatus, WorkflowError> {
        transition(proposal, index, StepStatus::Skipped, "skip")
    }

    pub fn manual_done(&self, proposal: &mut WorkflowProposal, index: usize) -> Result<StepStatus, WorkflowError> {
        transition(proposal, index, StepStatus::Manual, "mark done")
    }

    async fn run_procedural(&self, prompt: &str, cancel: &CancellationToken) -> Result<serde_json::Value, String> {
        let planned = self.planner.generate_plan(prompt, cancel).await;
        let Some(plan) = planned.plan else {
            return Err(format!("planning failed: {}", planned.errors.join("; ")));
        };
        let report = self.executor.execute_plan(&plan, prompt, cancel).await;
        let value = serde_json::to_value(&report).map_err(|e| e.to_string())?;
        if report.success {
            Ok(value)
        } else {
            Err(report
                .failed_steps
                .last()
                .map(|f| format!("step {} ({}) failed: {}", f.step_number, f.action, f.reason))
                .unwrap_or_else(|| "execution did not complete".to_string()))
        }
    }

    async fn run_neural(
        &self,
        step: &WorkflowStep,
        prompt: &str,
        prior_mesh: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, String> {
        let (stage, request) = match step.category {
            StepCategory::Texturing | StepCategory::Materials => {
                let mesh = prior_mesh.ok_or("no mesh from an earlier step to texture")?;
                (StageId::Texturing, GenerationRequest::texture(mesh, Some(prompt.to_string())))
            }
            _ => (StageId::Geometry, GenerationRequest::text(prompt)),
        };
        let request = match &step.provider {
            Some(slug) => request.with_provider(slug.clone()),
            None => request,
        };

        let result = self
            .registry
            .generate(stage, &request, cancel)
            .await
            .map_err(|e| e.to_string())?;
        if result.is_completed() {
            Ok(json!({
                "provider": result.provider,
                "outputPath": result.output_path,
                "durationMs": result.duration_ms,
            }))
        } else {
            Err(result.error.unwrap_or_else(|| "generation failed".to_string()))
        }
    }
}

fn step_mut(proposal: &mut WorkflowProposal, index: usize) -> Result<&mut WorkflowStep, WorkflowError> {
    proposal
        .steps
        .get_mut(index)
        .ok_or(WorkflowError::UnknownStep(index))
}

fn transition(
    proposal: &mut WorkflowProposal,
    index: usize,
    to: StepStatus,
    action: &'static str,
) -> Result<StepStatus, WorkflowError> {
    let step = step_mut(proposal, index)?;
    if !matches!(step.status, StepStatus::Pending | StepStatus::Failed) {
        return Err(WorkflowError::InvalidTransition {
            index,
            from: step.status,
            action,
        });
    }
    step.status = to;
    Ok(to)
}

/// Most recent artifact produced by a completed neural step.
fn latest_artifact(steps: &[WorkflowStep]) -> Option<PathBuf> {
    steps
        .iter()
        .rev()
        .filter(|s| s.status == StepStatus::Completed)
        .find_map(|s| {
            s.result
                .as_ref()
                .and_then(|r| r.get("outputPath"))
                .and_then(|p| p.as_str())
                .map(PathBuf::from)
        })
}
