//! Workflow advisor: breaks a request into a reviewable checklist with a
//! recommended tool per step. It never executes anything itself; see
//! [`WorkflowRunner`] for that.

pub mod knowledge;
pub mod runner;

use std::sync::Arc;

use llmbridge::{parse_json_object, LlmClient, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::neural;
use crate::router::Strategy;

pub use runner::{WorkflowError, WorkflowRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Concept,
    BaseMesh,
    Detailing,
    Texturing,
    Materials,
    Retopology,
    UvUnwrap,
    Rigging,
    Animation,
    Lighting,
    SceneLayout,
    Export,
}

impl StepCategory {
    pub const ALL: [StepCategory; 12] = [
        StepCategory::Concept,
        StepCategory::BaseMesh,
        StepCategory::Detailing,
        StepCategory::Texturing,
        StepCategory::Materials,
        StepCategory::Retopology,
        StepCategory::UvUnwrap,
        StepCategory::Rigging,
        StepCategory::Animation,
        StepCategory::Lighting,
        StepCategory::SceneLayout,
        StepCategory::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepCategory::Concept => "concept",
            StepCategory::BaseMesh => "base_mesh",
            StepCategory::Detailing => "detailing",
            StepCategory::Texturing => "texturing",
            StepCategory::Materials => "materials",
            StepCategory::Retopology => "retopology",
            StepCategory::UvUnwrap => "uv_unwrap",
            StepCategory::Rigging => "rigging",
            StepCategory::Animation => "animation",
            StepCategory::Lighting => "lighting",
            StepCategory::SceneLayout => "scene_layout",
            StepCategory::Export => "export",
        }
    }

    /// Unknown labels become `Concept`.
    pub fn coerce(label: &str) -> Self {
        let normalized = normalize(label);
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(StepCategory::Concept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedTool {
    Neural,
    ProceduralAgent,
    Manual,
}

impl RecommendedTool {
    /// Unknown labels become `Manual`.
    pub fn coerce(label: &str) -> Self {
        match normalize(label).as_str() {
            "neural" => RecommendedTool::Neural,
            "procedural_agent" | "procedural" | "agent" => RecommendedTool::ProceduralAgent,
            _ => RecommendedTool::Manual,
        }
    }
}

fn normalize(label: &str) -> String {
    label
        .trim()
        .to_ascii_lowercase()
        .replace(['-', ' '], "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Manual,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Skipped | StepStatus::Manual
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub index: usize,
    pub title: String,
    pub description: String,
    pub category: StepCategory,
    pub recommended_tool: RecommendedTool,
    pub rationale: String,
    pub alternatives: Vec<RecommendedTool>,
    pub estimated_duration: String,
    pub depends_on_previous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    /// Only set for neural steps, and only with a known provider slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    Llm,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProposal {
    pub title: String,
    pub request: String,
    pub strategy: Strategy,
    pub source: ProposalSource,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Default)]
pub struct AdviseOptions {
    pub scene_context: Option<String>,
}

/// Loose shape of the model's reply; every field is coerced afterwards.
#[derive(Debug, Deserialize)]
struct RawProposal {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStep {
    #[serde(alias = "name")]
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    #[serde(alias = "recommended_tool", alias = "tool")]
    recommended_tool: Option<String>,
    rationale: Option<String>,
    alternatives: Vec<Value>,
    #[serde(alias = "estimated_duration", alias = "duration")]
    estimated_duration: Option<Value>,
    #[serde(alias = "depends_on_previous")]
    depends_on_previous: Option<bool>,
    tip: Option<String>,
    provider: Option<String>,
}

const ADVISOR_SYSTEM_PROMPT: &str = "You plan 3D asset production workflows for a human artist. \
Break the request into an ordered checklist. Reply with one JSON object: \
{\"title\": string, \"steps\": [{\"title\": string, \"description\": string, \
\"category\": one of concept|base_mesh|detailing|texturing|materials|retopology|uv_unwrap|rigging|animation|lighting|scene_layout|export, \
\"recommendedTool\": one of neural|procedural_agent|manual, \"rationale\": string, \
\"alternatives\": [tool], \"estimatedDuration\": string, \"dependsOnPrevious\": boolean, \
\"tip\": string or null, \"provider\": provider slug or null}]}.";

pub struct WorkflowAdvisor {
    llm: Arc<dyn LlmClient>,
}

impl WorkflowAdvisor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// One LLM call, coerced into a proposal; the strategy's template when
    /// the call fails or yields no usable steps.
    #[tracing::instrument(name = "advisor.propose", skip(self, request, options), fields(strategy = %strategy))]
    pub async fn generate_workflow_proposal(
        &self,
        request: &str,
        strategy: Strategy,
        options: &AdviseOptions,
    ) -> WorkflowProposal {
        match self.ask(request, strategy, options).await {
            Ok(proposal) => {
                info!(steps = proposal.steps.len(), "workflow proposed");
                proposal
            }
            Err(reason) => {
                warn!(%reason, "falling back to template workflow");
                template_proposal(request, strategy)
            }
        }
    }

    async fn ask(
        &self,
        request: &str,
        strategy: Strategy,
        options: &AdviseOptions,
    ) -> Result<WorkflowProposal, String> {
        let providers: Vec<&str> = neural::all_meta().iter().map(|m| m.slug).collect();
        let mut prompt = format!(
            "Request: {}\nPreferred strategy: {}\nKnown providers: {}",
            request,
            strategy,
            providers.join(", ")
        );
        if let Some(scene) = &options.scene_context {
            prompt.push_str(&format!("\nCurrent scene: {}", scene));
        }

        let text = self
            .llm
            .generate(
                LlmRequest::prompt(prompt)
                    .with_system(ADVISOR_SYSTEM_PROMPT)
                    .with_temperature(0.4)
                    .json(),
            )
            .await
            .map_err(|e| format!("llm call failed: {}", e))?;
        let raw: RawProposal = parse_json_object(&text).map_err(|e| e.to_string())?;

        let steps: Vec<WorkflowStep> = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| coerce_step(index, step))
            .collect();
        if steps.is_empty() {
            return Err("proposal had no steps".to_string());
        }

        Ok(WorkflowProposal {
            title: raw
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| default_title(request)),
            request: request.to_string(),
            strategy,
            source: ProposalSource::Llm,
            steps,
        })
    }
}

fn default_title(request: &str) -> String {
    let trimmed = request.trim();
    let short: String = trimmed.chars().take(60).collect();
    if short.len() < trimmed.len() {
        format!("Workflow: {}…", short)
    } else {
        format!("Workflow: {}", short)
    }
}

fn coerce_step(index: usize, raw: RawStep) -> WorkflowStep {
    let category = raw
        .category
        .as_deref()
        .map(StepCategory::coerce)
        .unwrap_or(StepCategory::Concept);
    let kb = knowledge::knowledge(category);
    let tool = raw
        .recommended_tool
        .as_deref()
        .map(RecommendedTool::coerce)
        .unwrap_or(RecommendedTool::Manual);

    let mut alternatives: Vec<RecommendedTool> = Vec::new();
    for alt in raw.alternatives.iter().filter_map(Value::as_str).map(RecommendedTool::coerce) {
        if alt != tool && !alternatives.contains(&alt) {
            alternatives.push(alt);
        }
    }

    let provider = if tool == RecommendedTool::Neural {
        raw.provider.filter(|slug| neural::meta(slug).is_some())
    } else {
        None
    };

    let estimated_duration = match raw.estimated_duration {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => format!("{} min", n),
        _ => kb.estimate.to_string(),
    };

    WorkflowStep {
        index,
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| kb.title.to_string()),
        description: raw.description.unwrap_or_else(|| kb.description.to_string()),
        category,
        recommended_tool: tool,
        rationale: raw.rationale.unwrap_or_default(),
        alternatives,
        estimated_duration,
        depends_on_previous: index > 0 && raw.depends_on_previous.unwrap_or(true),
        tip: raw.tip.filter(|t| !t.trim().is_empty()),
        provider,
        status: StepStatus::Pending,
        result: None,
        error: None,
    }
}

/// Deterministic proposal built from the knowledge base.
pub fn template_proposal(request: &str, strategy: Strategy) -> WorkflowProposal {
    let steps = knowledge::template(strategy)
        .iter()
        .enumerate()
        .map(|(index, (category, tool, provider))| {
            let kb = knowledge::knowledge(*category);
            let alternatives = std::iter::once(kb.default_tool)
                .chain(kb.alternatives.iter().copied())
                .filter(|alt| alt != tool)
                .fold(Vec::new(), |mut acc, alt| {
                    if !acc.contains(&alt) {
                        acc.push(alt);
                    }
                    acc
                });
            WorkflowStep {
                index,
                title: kb.title.to_string(),
                description: kb.description.to_string(),
                category: *category,
                recommended_tool: *tool,
                rationale: format!("Standard {} step for a {} workflow.", category.as_str(), strategy),
                alternatives,
                estimated_duration: kb.estimate.to_string(),
                depends_on_previous: index > 0,
                tip: kb.tip.map(str::to_string),
                provider: provider.map(str::to_string),
                status: StepStatus::Pending,
                result: None,
                error: None,
            }
        })
        .collect();

    WorkflowProposal {
        title: default_title(request),
        request: request.to_string(),
        strategy,
        source: ProposalSource::Template,
        steps,
    }
}
