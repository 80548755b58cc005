//! Meshwright - natural-language 3D content orchestration.
//!
//! A request is classified into a strategy, then realised inside a running
//! 3D application by LLM-planned tool calls, by neural generation backends,
//! or by the hybrid pipeline that chains both.

pub mod advisor;
pub mod assistant;
pub mod catalog;
pub mod executor;
pub mod neural;
pub mod pipeline;
pub mod planner;
pub mod router;
pub mod stage;
pub mod telemetry;

pub use advisor::{WorkflowAdvisor, WorkflowProposal, WorkflowRunner};
pub use assistant::{AllowAll, Assistant, FulfillmentReport, UsageGate};
pub use executor::{Connector, ExecutionReport, Executor, TcpConnector};
pub use neural::{GenerationRequest, GenerationResult, NeuralProvider, ProviderError, ProviderRegistry};
pub use pipeline::{HybridPipeline, PipelineOptions, PipelineResult, StageStatus};
pub use planner::{ExecutionPlan, PlanResult, Planner};
pub use router::{ClassifyOptions, Strategy, StrategyDecision, StrategyRouter};
pub use stage::StageId;
