use std::sync::Arc;

use llmbridge::ScriptedLlm;
use meshwright::router::{ClassificationMethod, FALLBACK_CONFIDENCE};
use meshwright::{ClassifyOptions, Strategy, StrategyRouter};
use pretty_assertions::assert_eq;

fn router(llm: &Arc<ScriptedLlm>) -> StrategyRouter {
    StrategyRouter::new(llm.clone())
}

#[tokio::test]
async fn hard_surface_request_is_procedural_without_llm() {
    let llm = Arc::new(ScriptedLlm::new());
    let decision = router(&llm)
        .classify("a low poly sports car with red metallic paint", &ClassifyOptions::default())
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(decision.classification_method, ClassificationMethod::Keyword);
    assert_eq!(decision.suggested_providers, None);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn creature_request_is_neural_with_shape_provider() {
    let llm = Arc::new(ScriptedLlm::new());
    let decision = router(&llm)
        .classify("a fierce dragon with glowing eyes", &ClassifyOptions::default())
        .await;

    assert_eq!(decision.strategy, Strategy::Neural);
    assert_eq!(
        decision.suggested_providers,
        Some(vec!["hunyuan-shape".to_string()])
    );
    assert!(decision.confidence > FALLBACK_CONFIDENCE);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn generation_plus_rigging_is_hybrid() {
    let llm = Arc::new(ScriptedLlm::new());
    let decision = router(&llm)
        .classify(
            "generate a goblin character, rig it and export to fbx for unity",
            &ClassifyOptions::default(),
        )
        .await;

    assert_eq!(decision.strategy, Strategy::Hybrid);
    assert_eq!(decision.classification_method, ClassificationMethod::Keyword);
    assert_eq!(decision.suggested_providers.map(|p| p.len()), Some(2));
}

#[tokio::test]
async fn export_of_a_non_organic_object_stays_procedural() {
    let llm = Arc::new(ScriptedLlm::new());
    let decision = router(&llm)
        .classify(
            "generate a wooden table and export it as glb",
            &ClassifyOptions::default(),
        )
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(decision.classification_method, ClassificationMethod::Keyword);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn dominant_keywords_win_mixed_requests() {
    let llm = Arc::new(ScriptedLlm::new());
    let decision = router(&llm)
        .classify("a wooden chair next to a tree", &ClassifyOptions::default())
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn override_skips_classification() {
    let llm = Arc::new(ScriptedLlm::new());
    let options = ClassifyOptions {
        override_strategy: Some(Strategy::Neural),
        ..Default::default()
    };
    let decision = router(&llm).classify("a cube", &options).await;

    assert_eq!(decision.strategy, Strategy::Neural);
    assert_eq!(decision.classification_method, ClassificationMethod::UserOverride);
    assert_eq!(decision.confidence, 1.0);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn ambiguous_request_asks_the_llm() {
    let llm = Arc::new(ScriptedLlm::with_replies([
        r#"Sure: {"strategy": "neural", "confidence": 0.9, "reasoning": "cozy props are organic"}"#,
    ]));
    let options = ClassifyOptions {
        scene_context: Some("empty scene".to_string()),
        ..Default::default()
    };
    let decision = router(&llm)
        .classify("something cozy for my game", &options)
        .await;

    assert_eq!(decision.strategy, Strategy::Neural);
    assert_eq!(decision.classification_method, ClassificationMethod::Llm);
    assert!((decision.confidence - 0.9).abs() < 1e-6);
    assert_eq!(decision.reasoning, "cozy props are organic");

    let requests = llm.requests();
    let prompt = requests[0].last_user_text().unwrap_or_default();
    assert!(prompt.contains("empty scene"));
}

#[tokio::test]
async fn llm_failure_defaults_to_procedural() {
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_error("connection refused");
    let decision = router(&llm)
        .classify("something cozy for my game", &ClassifyOptions::default())
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
    assert_eq!(decision.classification_method, ClassificationMethod::Llm);
}

#[tokio::test]
async fn unknown_llm_strategy_defaults_to_procedural() {
    let llm = Arc::new(ScriptedLlm::with_replies([r#"{"strategy": "magic"}"#]));
    let decision = router(&llm)
        .classify("something cozy for my game", &ClassifyOptions::default())
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
}

#[tokio::test]
async fn keyword_only_never_calls_the_llm() {
    let llm = Arc::new(ScriptedLlm::new());
    let options = ClassifyOptions {
        keyword_only: true,
        ..Default::default()
    };
    let decision = router(&llm)
        .classify("something cozy for my game", &options)
        .await;

    assert_eq!(decision.strategy, Strategy::Procedural);
    assert_eq!(decision.classification_method, ClassificationMethod::Keyword);
    assert_eq!(llm.call_count(), 0);
}
