mod common;

use std::path::PathBuf;
use std::sync::Arc;

use llmbridge::ScriptedLlm;
use meshconf::ProvidersConfig;
use meshwright::advisor::{
    AdviseOptions, ProposalSource, RecommendedTool, StepCategory, StepStatus, WorkflowError,
};
use meshwright::{
    Executor, Planner, ProviderRegistry, Strategy, WorkflowAdvisor, WorkflowProposal,
    WorkflowRunner,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{ScriptedConnector, StubBehaviour, StubProvider};

const PROPOSAL: &str = r#"Here is a workflow:
{
  "title": "Game-ready fox",
  "steps": [
    {"title": "Block out the fox", "category": "base mesh", "recommendedTool": "neural",
     "provider": "hunyuan-shape", "estimatedDuration": 15, "dependsOnPrevious": true},
    {"title": "Paint fur", "category": "texturing", "tool": "NEURAL", "provider": "imaginary-gpu"},
    {"title": "Light the scene", "category": "lighting", "recommendedTool": "procedural_agent",
     "provider": "hunyuan-shape"},
    {"name": "Final export", "category": "export", "recommendedTool": "manual",
     "alternatives": ["manual", "procedural-agent", "procedural_agent"], "tip": "  "}
  ]
}"#;

const LIGHTING_PLAN: &str = r#"{
  "summary": "Key light",
  "steps": [
    {"stepNumber": 1, "action": "get_scene_info", "parameters": {}},
    {"stepNumber": 2, "action": "create_light", "parameters": {"type": "AREA", "name": "Key"}}
  ]
}"#;

async fn propose() -> WorkflowProposal {
    let llm = Arc::new(ScriptedLlm::with_replies([PROPOSAL]));
    WorkflowAdvisor::new(llm)
        .generate_workflow_proposal("a low poly fox for my game", Strategy::Hybrid, &AdviseOptions::default())
        .await
}

#[tokio::test]
async fn model_reply_is_coerced_into_steps() {
    let proposal = propose().await;

    assert_eq!(proposal.source, ProposalSource::Llm);
    assert_eq!(proposal.title, "Game-ready fox");
    assert_eq!(proposal.steps.len(), 4);

    let block_out = &proposal.steps[0];
    assert_eq!(block_out.category, StepCategory::BaseMesh);
    assert_eq!(block_out.recommended_tool, RecommendedTool::Neural);
    assert_eq!(block_out.provider.as_deref(), Some("hunyuan-shape"));
    assert_eq!(block_out.estimated_duration, "15 min");
    assert!(!block_out.depends_on_previous);

    let paint = &proposal.steps[1];
    assert_eq!(paint.category, StepCategory::Texturing);
    assert_eq!(paint.recommended_tool, RecommendedTool::Neural);
    assert_eq!(paint.provider, None);
    assert!(paint.depends_on_previous);

    // Providers only make sense on neural steps.
    assert_eq!(proposal.steps[2].provider, None);

    let export = &proposal.steps[3];
    assert_eq!(export.title, "Final export");
    assert_eq!(export.recommended_tool, RecommendedTool::Manual);
    assert_eq!(export.alternatives, vec![RecommendedTool::ProceduralAgent]);
    assert_eq!(export.tip, None);
    assert!(proposal.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn llm_failure_falls_back_to_template() {
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_error("upstream unavailable");
    let proposal = WorkflowAdvisor::new(llm)
        .generate_workflow_proposal("a fox", Strategy::Neural, &AdviseOptions::default())
        .await;

    assert_eq!(proposal.source, ProposalSource::Template);
    assert_eq!(proposal.strategy, Strategy::Neural);
    assert!(!proposal.steps.is_empty());
    assert!(!proposal.steps[0].depends_on_previous);
    assert!(proposal.steps[1..].iter().all(|s| s.depends_on_previous));
    assert!(proposal
        .steps
        .iter()
        .any(|s| s.recommended_tool == RecommendedTool::Neural));
}

#[tokio::test]
async fn empty_proposal_falls_back_to_template() {
    let llm = Arc::new(ScriptedLlm::with_replies([r#"{"title": "nothing", "steps": []}"#]));
    let proposal = WorkflowAdvisor::new(llm)
        .generate_workflow_proposal("a desk", Strategy::Procedural, &AdviseOptions::default())
        .await;

    assert_eq!(proposal.source, ProposalSource::Template);
    assert_eq!(proposal.title, "Workflow: a desk");
}

struct Harness {
    runner: WorkflowRunner,
    shape: Arc<StubProvider>,
    paint: Arc<StubProvider>,
    connector: ScriptedConnector,
}

fn harness() -> Harness {
    let shape = StubProvider::new(
        "hunyuan-shape",
        StubBehaviour::Produce(PathBuf::from("/tmp/gen/fox.glb")),
    );
    let paint = StubProvider::new(
        "hunyuan-paint",
        StubBehaviour::Produce(PathBuf::from("/tmp/gen/fox-painted.glb")),
    );
    let registry = ProviderRegistry::new(ProvidersConfig::new(), "/tmp/gen")
        .with_provider(shape.clone())
        .with_provider(paint.clone());

    let planner = Planner::new(Arc::new(ScriptedLlm::with_replies([LIGHTING_PLAN])));
    let connector = ScriptedConnector::default();
    // Empty queue: the judge falls back to the response status.
    let executor = Executor::new(Arc::new(ScriptedLlm::new()), Arc::new(connector.clone()));

    Harness {
        runner: WorkflowRunner::new(planner, executor, Arc::new(registry)),
        shape,
        paint,
        connector,
    }
}

#[tokio::test]
async fn steps_run_through_providers_and_executor() {
    let mut proposal = propose().await;
    let h = harness();
    let cancel = CancellationToken::new();

    let status = h.runner.execute(&mut proposal, 0, &cancel).await.unwrap();
    assert_eq!(status, StepStatus::Completed);
    assert_eq!(
        proposal.steps[0].result.as_ref().unwrap()["outputPath"],
        "/tmp/gen/fox.glb"
    );

    // Texturing picks up the mesh from the block-out step.
    let status = h.runner.execute(&mut proposal, 1, &cancel).await.unwrap();
    assert_eq!(status, StepStatus::Completed);
    let paint_calls = h.paint.calls.lock().unwrap().clone();
    assert_eq!(paint_calls[0].mesh_path, Some(PathBuf::from("/tmp/gen/fox.glb")));
    assert_eq!(h.shape.call_count(), 1);

    let status = h.runner.execute(&mut proposal, 2, &cancel).await.unwrap();
    assert_eq!(status, StepStatus::Completed);
    assert_eq!(
        h.connector.log.command_types(),
        vec!["get_scene_info", "create_light", "get_scene_info"]
    );

    assert!(matches!(
        h.runner.execute(&mut proposal, 3, &cancel).await,
        Err(WorkflowError::ManualStep(3))
    ));
    assert_eq!(h.runner.manual_done(&mut proposal, 3).unwrap(), StepStatus::Manual);

    assert!(matches!(
        h.runner.execute(&mut proposal, 2, &cancel).await,
        Err(WorkflowError::InvalidTransition { from: StepStatus::Completed, .. })
    ));
    assert!(matches!(
        h.runner.skip(&mut proposal, 9),
        Err(WorkflowError::UnknownStep(9))
    ));
}

#[tokio::test]
async fn texturing_without_a_mesh_fails_and_can_be_skipped() {
    let mut proposal = propose().await;
    let h = harness();
    let cancel = CancellationToken::new();

    assert_eq!(h.runner.skip(&mut proposal, 0).unwrap(), StepStatus::Skipped);
    let status = h.runner.execute(&mut proposal, 1, &cancel).await.unwrap();

    assert_eq!(status, StepStatus::Failed);
    assert!(proposal.steps[1]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no mesh"));
    assert_eq!(h.paint.call_count(), 0);
    assert_eq!(h.runner.skip(&mut proposal, 1).unwrap(), StepStatus::Skipped);
}
