//! Front door: entitlement check, strategy classification, then dispatch to
//! the planner/executor, a neural provider, or the hybrid pipeline.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{ExecutionReport, Executor};
use crate::neural::{self, GenerationRequest, GenerationResult, ProviderRegistry};
use crate::pipeline::{payloads, HybridPipeline, PipelineOptions, PipelineResult, ScriptExecutor};
use crate::planner::{ExecutionPlan, Planner};
use crate::router::{ClassifyOptions, Strategy, StrategyDecision, StrategyRouter};
use crate::stage::StageId;

/// What gets reported back to the usage collaborator after a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub strategy: Option<Strategy>,
    pub success: bool,
    pub duration_ms: u64,
}

/// Entitlement and usage accounting, owned by the surrounding product.
#[async_trait]
pub trait UsageGate: Send + Sync {
    async fn is_entitled(&self, user: &str, request: &str) -> bool;
    async fn record_usage(&self, user: &str, usage: &UsageRecord);
}

/// Grants everything and records nothing.
pub struct AllowAll;

#[async_trait]
impl UsageGate for AllowAll {
    async fn is_entitled(&self, _user: &str, _request: &str) -> bool {
        true
    }

    async fn record_usage(&self, _user: &str, _usage: &UsageRecord) {}
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentReport {
    pub request: String,
    pub entitled: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<StrategyDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plan_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

pub struct Assistant {
    gate: Arc<dyn UsageGate>,
    router: StrategyRouter,
    planner: Planner,
    executor: Executor,
    registry: Arc<ProviderRegistry>,
    pipeline: HybridPipeline,
    pipeline_options: PipelineOptions,
    scripts: Option<Arc<dyn ScriptExecutor>>,
}

impl Assistant {
    pub fn new(
        router: StrategyRouter,
        planner: Planner,
        executor: Executor,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            gate: Arc::new(AllowAll),
            router,
            planner,
            executor,
            pipeline: HybridPipeline::new(registry.clone()),
            registry,
            pipeline_options: PipelineOptions::default(),
            scripts: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn UsageGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Used for the pipeline's script stages and for importing neural output.
    pub fn with_script_executor(mut self, scripts: Arc<dyn ScriptExecutor>) -> Self {
        self.pipeline = HybridPipeline::new(self.registry.clone()).with_script_executor(scripts.clone());
        self.scripts = Some(scripts);
        self
    }

    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.pipeline_options = options;
        self
    }

    #[tracing::instrument(name = "assistant.fulfill", skip(self, request, options, cancel))]
    pub async fn fulfill(
        &self,
        user: &str,
        request: &str,
        options: &ClassifyOptions,
        cancel: &CancellationToken,
    ) -> FulfillmentReport {
        let started = Instant::now();
        let mut report = FulfillmentReport {
            request: request.to_string(),
            ..Default::default()
        };

        if !self.gate.is_entitled(user, request).await {
            warn!(user, "request not entitled");
            report.error = Some("not entitled to this request".to_string());
            report.duration_ms = started.elapsed().as_millis() as u64;
            return report;
        }
        report.entitled = true;

        let decision = self.router.classify(request, options).await;
        info!(strategy = %decision.strategy, method = ?decision.classification_method, "request classified");
        let strategy = decision.strategy;
        let preferred = decision.suggested_providers.as_ref().and_then(|slugs| {
            slugs
                .iter()
                .find(|slug| neural::meta(slug).is_some_and(|m| self.registry.is_configured(m)))
                .cloned()
        });
        report.decision = Some(decision);

        match strategy {
            Strategy::Procedural => self.procedural(request, &mut report, cancel).await,
            Strategy::Neural => self.neural(request, preferred, &mut report, cancel).await,
            Strategy::Hybrid => {
                let result = self
                    .pipeline
                    .run(request, &self.pipeline_options, None, cancel)
                    .await;
                report.success = result.success;
                report.pipeline = Some(result);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.gate
            .record_usage(
                user,
                &UsageRecord {
                    strategy: Some(strategy),
                    success: report.success,
                    duration_ms: report.duration_ms,
                },
            )
            .await;
        report
    }

    async fn procedural(&self, request: &str, report: &mut FulfillmentReport, cancel: &CancellationToken) {
        let planned = self.planner.generate_plan(request, cancel).await;
        report.plan_errors = planned.errors;
        let Some(plan) = planned.plan else {
            report.error = Some("no valid plan could be generated".to_string());
            return;
        };
        let execution = self.executor.execute_plan(&plan, request, cancel).await;
        report.success = execution.success;
        report.plan = Some(plan);
        report.execution = Some(execution);
    }

    async fn neural(
        &self,
        request: &str,
        preferred: Option<String>,
        report: &mut FulfillmentReport,
        cancel: &CancellationToken,
    ) {
        let mut generation = GenerationRequest::text(request);
        if let Some(slug) = preferred {
            generation = generation.with_provider(slug);
        }
        let result = match self.registry.generate(StageId::Geometry, &generation, cancel).await {
            Ok(result) => result,
            Err(e) => {
                report.error = Some(e.to_string());
                return;
            }
        };
        report.success = result.is_completed();

        if let (Some(scripts), Some(path)) = (&self.scripts, result.output_path.as_ref()) {
            if result.is_completed() {
                let name = format!("meshwright_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                match scripts.run_script(&payloads::import_model(path, &name)).await {
                    Ok(output) => report.import = Some(output),
                    Err(e) => {
                        report.success = false;
                        report.error = Some(format!("import failed: {}", e));
                    }
                }
            }
        }
        if !result.is_completed() && report.error.is_none() {
            report.error = result.error.clone();
        }
        report.generation = Some(result);
    }
}
