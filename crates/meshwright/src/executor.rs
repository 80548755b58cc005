//! Plan executor.
//!
//! Runs a plan's steps in order over one transport. After every step that
//! reached the listener, an LLM judge compares the result with the step's
//! expected outcome. A rejected step gets exactly one corrective action; if
//! that also fails the plan halts at that step.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llmbridge::{parse_json_object, LlmClient, LlmRequest};
use meshproto::{ClientConfig, Command, CommandTransport, ProtocolClient, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{self, ToolToggles, BASELINE_TOOL};
use crate::planner::{ExecutionPlan, PlanStep};

/// Opens a fresh transport for one plan run.
pub trait Connector: Send + Sync {
    fn open(&self) -> Box<dyn CommandTransport>;
}

/// Connects to the 3D application over TCP.
pub struct TcpConnector {
    config: ClientConfig,
}

impl TcpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn open(&self) -> Box<dyn CommandTransport> {
        Box::new(ProtocolClient::new(self.config.clone()))
    }
}

/// One audit-trail record. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step_number: u32,
    pub tool: String,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub recovery: bool,
}

impl ExecutionLogEntry {
    fn from_response(
        step_number: u32,
        tool: &str,
        parameters: &Value,
        response: &Response,
        recovery: bool,
    ) -> Self {
        let (result, error) = if response.is_error() {
            (None, Some(response.error_text()))
        } else {
            (
                Some(response.result.clone().unwrap_or(Value::Null)),
                None,
            )
        };
        Self {
            timestamp: Utc::now(),
            step_number,
            tool: tool.to_string(),
            parameters: parameters.clone(),
            result,
            error,
            recovery,
        }
    }

    fn from_error(
        step_number: u32,
        tool: &str,
        parameters: &Value,
        error: String,
        recovery: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            step_number,
            tool: tool.to_string(),
            parameters: parameters.clone(),
            result: None,
            error: Some(error),
            recovery,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    pub success: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RecoveryProposal {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default, alias = "parameters")]
    params: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_number: u32,
    pub action: String,
    /// Set when a corrective action stood in for the original result.
    pub recovered_by: Option<String>,
    pub result: Option<Value>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub success: bool,
    pub completed_steps: Vec<StepOutcome>,
    pub failed_steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_scene_state: Option<Value>,
    pub logs: Vec<ExecutionLogEntry>,
    pub cancelled: bool,
}

impl ExecutionReport {
    fn new() -> Self {
        Self {
            success: false,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            final_scene_state: None,
            logs: Vec::new(),
            cancelled: false,
        }
    }

    fn fail_step(&mut self, step: &PlanStep, result: Option<Value>, reason: String) {
        self.failed_steps.push(StepOutcome {
            step_number: step.step_number,
            action: step.action.clone(),
            recovered_by: None,
            result,
            reason,
        });
        self.success = false;
    }
}

const JUDGE_SYSTEM_PROMPT: &str = "You verify steps executed in a 3D application. \
Compare the actual result with the expected outcome and the user's goal. \
Reply with one JSON object: {\"success\": boolean, \"reason\": string, \"concerns\": [string]}.";

const RECOVERY_SYSTEM_PROMPT: &str = "A step executed in a 3D application did not achieve its goal. \
Propose exactly one corrective tool call from the list. \
Reply with one JSON object: {\"tool\": string or null, \"params\": object, \"reason\": string}. \
Use null when no single call can fix it.";

pub struct Executor {
    llm: Arc<dyn LlmClient>,
    connector: Arc<dyn Connector>,
    toggles: ToolToggles,
}

impl Executor {
    pub fn new(llm: Arc<dyn LlmClient>, connector: Arc<dyn Connector>) -> Self {
        Self {
            llm,
            connector,
            toggles: ToolToggles::default(),
        }
    }

    /// Asset-library switches applied to recovery proposals.
    pub fn with_toggles(mut self, toggles: ToolToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        connector: Arc<dyn Connector>,
        config: &meshconf::MeshConfig,
    ) -> Self {
        Self::new(llm, connector).with_toggles(ToolToggles::from(&config.bootstrap.tools))
    }

    /// Run `plan` to completion or to the first unrecoverable step. The
    /// transport is closed on every path.
    #[tracing::instrument(
        name = "executor.execute_plan",
        skip(self, plan, request, cancel),
        fields(plan.steps = plan.len())
    )]
    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        request: &str,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let mut transport = self.connector.open();
        let report = self.run(transport.as_mut(), plan, request, cancel).await;
        transport.close().await;

        info!(
            success = report.success,
            completed = report.completed_steps.len(),
            failed = report.failed_steps.len(),
            "plan execution finished"
        );
        report
    }

    async fn run(
        &self,
        transport: &mut dyn CommandTransport,
        plan: &ExecutionPlan,
        request: &str,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::new();

        for step in &plan.steps {
            if cancel.is_cancelled() {
                warn!(step = step.step_number, "execution cancelled");
                report.cancelled = true;
                return report;
            }

            let command = Command::new(step.action.clone(), step.parameters.clone());
            let response = match transport.execute(command).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(step = step.step_number, error = %e, "transport failure, halting plan");
                    report.logs.push(ExecutionLogEntry::from_error(
                        step.step_number,
                        &step.action,
                        &step.parameters,
                        e.to_string(),
                        false,
                    ));
                    report.fail_step(step, None, format!("transport error: {}", e));
                    return report;
                }
            };
            report.logs.push(ExecutionLogEntry::from_response(
                step.step_number,
                &step.action,
                &step.parameters,
                &response,
                false,
            ));

            let verdict = self.judge(step, request, &response).await;
            if verdict.success {
                report.completed_steps.push(StepOutcome {
                    step_number: step.step_number,
                    action: step.action.clone(),
                    recovered_by: None,
                    result: response.result.clone(),
                    reason: verdict.reason,
                });
                continue;
            }

            info!(step = step.step_number, reason = %verdict.reason, "step rejected, attempting recovery");
            let Some(proposal) = self.propose_recovery(step, plan.len(), request, &response, &verdict).await else {
                report.fail_step(
                    step,
                    response.result.clone(),
                    format!("rejected with no recovery: {}", verdict.reason),
                );
                return report;
            };

            let tool = proposal.tool.unwrap_or_default();
            let command = Command::new(tool.clone(), proposal.params.clone());
            match transport.execute(command).await {
                Ok(fix) if fix.is_ok() => {
                    report.logs.push(ExecutionLogEntry::from_response(
                        step.step_number,
                        &tool,
                        &proposal.params,
                        &fix,
                        true,
                    ));
                    report.completed_steps.push(StepOutcome {
                        step_number: step.step_number,
                        action: step.action.clone(),
                        recovered_by: Some(tool),
                        result: fix.result.clone(),
                        reason: proposal
                            .reason
                            .unwrap_or_else(|| "recovered by corrective action".to_string()),
                    });
                }
                Ok(fix) => {
                    report.logs.push(ExecutionLogEntry::from_response(
                        step.step_number,
                        &tool,
                        &proposal.params,
                        &fix,
                        true,
                    ));
                    report.fail_step(
                        step,
                        fix.result.clone(),
                        format!("recovery '{}' failed: {}", tool, fix.error_text()),
                    );
                    return report;
                }
                Err(e) => {
                    report.logs.push(ExecutionLogEntry::from_error(
                        step.step_number,
                        &tool,
                        &proposal.params,
                        e.to_string(),
                        true,
                    ));
                    report.fail_step(step, None, format!("recovery '{}' transport error: {}", tool, e));
                    return report;
                }
            }
        }

        report.success = true;
        report.final_scene_state = fetch_scene_state(transport).await;
        report
    }

    async fn judge(&self, step: &PlanStep, request: &str, response: &Response) -> JudgeVerdict {
        let prompt = format!(
            "User goal: {}\nStep {}: {} {}\nExpected outcome: {}\nActual response: {}",
            request,
            step.step_number,
            step.action,
            step.parameters,
            step.expected_outcome,
            response.raw
        );
        let llm_request = LlmRequest::prompt(prompt)
            .with_system(JUDGE_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .json();

        let fallback = |why: String| JudgeVerdict {
            success: response.is_ok(),
            reason: format!("judge unavailable ({}); using response status", why),
            concerns: Vec::new(),
        };

        match self.llm.generate(llm_request).await {
            Ok(text) => parse_json_object::<JudgeVerdict>(&text)
                .unwrap_or_else(|e| fallback(e.to_string())),
            Err(e) => fallback(e.to_string()),
        }
    }

    async fn propose_recovery(
        &self,
        step: &PlanStep,
        plan_len: usize,
        request: &str,
        response: &Response,
        verdict: &JudgeVerdict,
    ) -> Option<RecoveryProposal> {
        let tools = catalog::filter_relevant_tools(request, Some(plan_len), self.toggles);
        let prompt = format!(
            "User goal: {}\nFailed step {}: {} {}\nExpected outcome: {}\nActual response: {}\n\
             Judge: {} {:?}\nAvailable tools:\n{}",
            request,
            step.step_number,
            step.action,
            step.parameters,
            step.expected_outcome,
            response.raw,
            verdict.reason,
            verdict.concerns,
            catalog::render_tool_list(&tools)
        );
        let llm_request = LlmRequest::prompt(prompt)
            .with_system(RECOVERY_SYSTEM_PROMPT)
            .with_temperature(0.2)
            .json();

        let text = match self.llm.generate(llm_request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "recovery proposal call failed");
                return None;
            }
        };
        let mut proposal: RecoveryProposal = match parse_json_object(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unparseable recovery proposal");
                return None;
            }
        };

        let known = match proposal.tool.as_deref() {
            Some(tool) if catalog::is_enabled_tool(tool, self.toggles) => true,
            Some(tool) if catalog::is_known_tool(tool) => {
                warn!(tool, "recovery proposed a tool disabled for this project");
                false
            }
            Some(tool) => {
                warn!(tool, "recovery proposed an unknown tool");
                false
            }
            None => false,
        };
        if !known {
            return None;
        }
        if proposal.params.is_null() {
            proposal.params = json!({});
        }
        Some(proposal)
    }
}

/// Best effort. Not logged; failures leave the report untouched.
async fn fetch_scene_state(transport: &mut dyn CommandTransport) -> Option<Value> {
    match transport.execute(Command::new(BASELINE_TOOL, json!({}))).await {
        Ok(response) if response.is_ok() => response.result,
        Ok(response) => {
            warn!(error = %response.error_text(), "final scene state unavailable");
            None
        }
        Err(e) => {
            warn!(error = %e, "final scene state unavailable");
            None
        }
    }
}
