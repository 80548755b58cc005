//! LLM-driven planner.
//!
//! One call per attempt. The model sees a filtered tool list and the JSON
//! schema of [`ExecutionPlan`]; the reply is scanned for the first JSON
//! object, validated, and retried with the validation errors as feedback up
//! to `max_retries` times.

use std::collections::HashSet;
use std::sync::Arc;

use llmbridge::{extract_json_object, ChatMessage, LlmClient, LlmRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{self, ToolToggles, BASELINE_TOOL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// 1-based position; steps run in ascending order.
    pub step_number: u32,
    /// Tool name from the catalog.
    pub action: String,
    /// Tool parameters as a JSON object.
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub rationale: String,
    /// What the scene should look like after this step.
    #[serde(default)]
    pub expected_outcome: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub summary: String,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    /// Build a plan with steps sorted by `step_number`.
    pub fn new(summary: impl Into<String>, mut steps: Vec<PlanStep>) -> Self {
        steps.sort_by_key(|s| s.step_number);
        Self {
            summary: summary.into(),
            steps,
            dependencies: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub plan: Option<ExecutionPlan>,
    pub raw_response: String,
    pub errors: Vec<String>,
    pub retries: u32,
}

/// Helper to generate JSON schema for a type
fn schema_for<T: JsonSchema>() -> Value {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let gen = settings.into_generator();
    let schema = gen.into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_default()
}

/// Parse and check a candidate plan document against the default toggles.
pub fn validate_plan(value: Value) -> Result<ExecutionPlan, Vec<String>> {
    validate_plan_for(value, ToolToggles::default())
}

/// Parse and check a candidate plan document. Actions must name a catalog
/// tool that `toggles` leaves enabled.
pub fn validate_plan_for(value: Value, toggles: ToolToggles) -> Result<ExecutionPlan, Vec<String>> {
    let parsed: ExecutionPlan = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => return Err(vec![format!("plan does not match schema: {}", e)]),
    };

    let mut errors = Vec::new();
    if parsed.summary.trim().is_empty() {
        errors.push("summary must not be empty".to_string());
    }
    if parsed.steps.is_empty() {
        errors.push("plan must contain at least one step".to_string());
    }

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(parsed.steps.len());
    for mut step in parsed.steps {
        if step.step_number == 0 {
            errors.push(format!("step '{}' has stepNumber 0; numbers start at 1", step.action));
        } else if !seen.insert(step.step_number) {
            errors.push(format!("duplicate stepNumber {}", step.step_number));
        }
        if !catalog::is_known_tool(&step.action) {
            errors.push(format!(
                "step {}: unknown action '{}'",
                step.step_number, step.action
            ));
        } else if !catalog::is_enabled_tool(&step.action, toggles) {
            errors.push(format!(
                "step {}: action '{}' is disabled for this project",
                step.step_number, step.action
            ));
        }
        match &step.parameters {
            Value::Null => step.parameters = Value::Object(Default::default()),
            Value::Object(_) => {}
            other => errors.push(format!(
                "step {}: parameters must be an object, got {}",
                step.step_number, other
            )),
        }
        steps.push(step);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut plan = ExecutionPlan::new(parsed.summary, steps);
    plan.dependencies = parsed.dependencies;
    plan.warnings = parsed.warnings;
    Ok(plan)
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    toggles: ToolToggles,
    max_retries: u32,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            toggles: ToolToggles::default(),
            max_retries: 1,
        }
    }

    pub fn with_toggles(mut self, toggles: ToolToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &meshconf::MeshConfig) -> Self {
        Self::new(llm)
            .with_toggles(ToolToggles::from(&config.bootstrap.tools))
            .with_max_retries(config.bootstrap.planner.max_retries)
    }

    fn system_prompt(&self, request: &str) -> String {
        let tools = catalog::filter_relevant_tools(request, None, self.toggles);
        let schema = serde_json::to_string_pretty(&schema_for::<ExecutionPlan>())
            .unwrap_or_default();

        format!(
            "You plan operations for a running 3D application.\n\
             Rules:\n\
             1. Step 1 must be `{baseline}` so the current scene is known.\n\
             2. Each step calls exactly one tool from the list below.\n\
             3. Number steps from 1 in execution order.\n\
             4. Reply with one JSON object matching the schema. No other text is required.\n\n\
             Available tools:\n{tools}\n\n\
             Schema:\n{schema}",
            baseline = BASELINE_TOOL,
            tools = catalog::render_tool_list(&tools),
            schema = schema,
        )
    }

    #[tracing::instrument(name = "planner.generate_plan", skip(self, request, cancel))]
    pub async fn generate_plan(&self, request: &str, cancel: &CancellationToken) -> PlanResult {
        let system = self.system_prompt(request);
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut result = PlanResult {
            plan: None,
            raw_response: String::new(),
            errors: Vec::new(),
            retries: 0,
        };

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                result.errors.push("planning cancelled".to_string());
                return result;
            }
            result.retries = attempt;

            let message = if attempt == 0 {
                format!("Request: {}", request)
            } else {
                format!(
                    "That plan was rejected:\n- {}\nReturn a corrected JSON plan for: {}",
                    result.errors.last().map(String::as_str).unwrap_or("invalid plan"),
                    request
                )
            };

            let llm_request = LlmRequest::prompt(message.clone())
                .with_system(system.clone())
                .with_history(history.clone())
                .with_temperature(0.2)
                .json();

            let text = match self.llm.generate(llm_request).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(attempt, error = %e, "plan generation call failed");
                    result.errors.push(format!("attempt {}: llm call failed: {}", attempt + 1, e));
                    continue;
                }
            };
            result.raw_response = text.clone();
            history.push(ChatMessage::user(message));
            history.push(ChatMessage::assistant(text.clone()));

            let Some(candidate) = extract_json_object(&text) else {
                result
                    .errors
                    .push(format!("attempt {}: no JSON object in response", attempt + 1));
                continue;
            };

            let value: Value = match serde_json::from_str(candidate) {
                Ok(v) => v,
                Err(e) => {
                    result.errors.push(format!("attempt {}: {}", attempt + 1, e));
                    continue;
                }
            };

            match validate_plan_for(value, self.toggles) {
                Ok(plan) => {
                    info!(plan.steps = plan.len(), retries = attempt, "plan generated");
                    result.plan = Some(plan);
                    return result;
                }
                Err(errors) => {
                    warn!(attempt, errors = ?errors, "plan failed validation");
                    result.errors.push(format!(
                        "attempt {}: {}",
                        attempt + 1,
                        errors.join("; ")
                    ));
                }
            }
        }

        result
    }
}
