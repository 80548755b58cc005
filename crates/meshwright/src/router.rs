//! Strategy router - decides whether a request is fulfilled procedurally,
//! by neural generation, or by the hybrid pipeline.
//!
//! Keyword scoring runs first and is free. The LLM is consulted only when
//! the keywords are ambiguous, and any failure there falls back to
//! procedural, the cheapest and most controllable strategy.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use llmbridge::{parse_json_object, LlmClient, LlmRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const OVERRIDE_CONFIDENCE: f32 = 1.0;
pub const HYBRID_CONFIDENCE: f32 = 0.85;
pub const OUTRIGHT_CONFIDENCE: f32 = 0.8;
pub const DOMINANCE_CONFIDENCE: f32 = 0.6;
pub const LLM_DEFAULT_CONFIDENCE: f32 = 0.7;
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Hybrid score at which the hybrid strategy wins outright.
pub const HYBRID_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Procedural,
    Neural,
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Procedural => "procedural",
            Strategy::Neural => "neural",
            Strategy::Hybrid => "hybrid",
        }
    }

    /// Providers worth trying first for this strategy.
    pub fn suggested_providers(&self) -> Option<Vec<String>> {
        match self {
            Strategy::Procedural => None,
            Strategy::Neural => Some(vec!["hunyuan-shape".to_string()]),
            Strategy::Hybrid => Some(vec![
                "hunyuan-shape".to_string(),
                "hunyuan-paint".to_string(),
            ]),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "procedural" => Ok(Strategy::Procedural),
            "neural" => Ok(Strategy::Neural),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Llm,
    UserOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDecision {
    pub strategy: Strategy,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_providers: Option<Vec<String>>,
    pub classification_method: ClassificationMethod,
}

impl StrategyDecision {
    fn new(
        strategy: Strategy,
        confidence: f32,
        reasoning: String,
        method: ClassificationMethod,
    ) -> Self {
        Self {
            strategy,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning,
            suggested_providers: strategy.suggested_providers(),
            classification_method: method,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    pub override_strategy: Option<Strategy>,
    pub scene_context: Option<String>,
    pub keyword_only: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeywordScores {
    pub procedural: u32,
    pub neural: u32,
    pub hybrid: u32,
}

struct PatternSet {
    procedural: Vec<Regex>,
    neural: Vec<Regex>,
    generation: Vec<Regex>,
    post_process: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
        .collect()
}

fn patterns() -> &'static PatternSet {
    static PATTERNS: OnceLock<PatternSet> = OnceLock::new();
    PATTERNS.get_or_init(|| PatternSet {
        procedural: compile(&[
            // primitives
            r"\b(cubes?|spheres?|cylinders?|cones?|torus|planes?|primitives?|boxe?s?|grid)\b",
            // architecture
            r"\b(house|buildings?|walls?|floors?|roofs?|rooms?|towers?|bridges?|windows?|doors?|stairs?|staircase|columns?)\b",
            // furniture
            r"\b(tables?|chairs?|desks?|shel(f|ves)|sofas?|couch|beds?|cabinets?|benches?)\b",
            // mechanical
            r"\b(cars?|vehicles?|engines?|gears?|machines?|wheels?|trucks?|robots?|spaceships?|airplanes?)\b",
            // scene edits
            r"\b(move|rotate|scale|delete|remove|duplicate|align|arrange|resize|position)\b",
            // lighting
            r"\b(lights?|lighting|lamps?|spotlights?|hdri|illuminate)\b",
            // camera
            r"\b(cameras?|render|viewport)\b",
            // materials
            r"\b(materials?|colou?r|red|green|blue|yellow|metallic|glass|wooden|shader)\b",
        ]),
        neural: compile(&[
            // organic
            r"\b(organic|realistic|photorealistic|lifelike)\b",
            // characters
            r"\b(characters?|person|people|humans?|humanoid|warriors?|heroes|hero|avatars?|faces?)\b",
            // creatures
            r"\b(creatures?|monsters?|dragons?|animals?|dogs?|cats?|horses?|birds?|dinosaurs?|beasts?|aliens?)\b",
            // nature
            r"\b(trees?|plants?|flowers?|rocks?|boulders?|mushrooms?|terrain|foliage)\b",
            // sculptural
            r"\b(sculpt\w*|statues?|figurines?|busts?|stylized)\b",
            // reference driven
            r"\b(from (an? )?(image|photo|picture|reference)|image[- ]to[- ]3d|text[- ]to[- ]3d)\b",
        ]),
        // organic subjects only; a bare "generate" does not count
        generation: compile(&[
            r"\b(characters?|creatures?|organic|sculpt\w*|humanoids?|monsters?|animals?|dragons?|beasts?|warriors?|avatars?)\b",
        ]),
        post_process: compile(&[
            r"\b(rig|rigged|rigging|skeleton|armature|bones)\b",
            r"\b(animat\w*|walk cycle|idle loop)\b",
            r"\b(export\w*|game[- ]ready|fbx|glb|gltf|unity|unreal)\b",
        ]),
    })
}

/// Keyword scores for `request`. Each matching pattern counts once; hybrid
/// patterns count double and need generation language to be present.
pub fn score_keywords(request: &str) -> KeywordScores {
    let set = patterns();
    let count = |res: &[Regex]| res.iter().filter(|re| re.is_match(request)).count() as u32;

    let hybrid = if set.generation.iter().any(|re| re.is_match(request)) {
        count(&set.post_process) * 2
    } else {
        0
    };

    KeywordScores {
        procedural: count(&set.procedural),
        neural: count(&set.neural),
        hybrid,
    }
}

/// Decide from keyword scores alone. `None` means ambiguous.
pub fn decide_from_scores(scores: KeywordScores) -> Option<(Strategy, f32, String)> {
    let KeywordScores {
        procedural: p,
        neural: n,
        hybrid: h,
    } = scores;

    if h >= HYBRID_THRESHOLD {
        return Some((
            Strategy::Hybrid,
            HYBRID_CONFIDENCE,
            format!("generation combined with rig/animate/export language (hybrid score {})", h),
        ));
    }
    if p > 0 && n == 0 {
        return Some((
            Strategy::Procedural,
            OUTRIGHT_CONFIDENCE,
            format!("only procedural keywords matched (score {})", p),
        ));
    }
    if n > 0 && p == 0 {
        return Some((
            Strategy::Neural,
            OUTRIGHT_CONFIDENCE,
            format!("only organic/neural keywords matched (score {})", n),
        ));
    }
    if p > 0 && n > 0 {
        if p >= 2 * n {
            return Some((
                Strategy::Procedural,
                DOMINANCE_CONFIDENCE,
                format!("procedural keywords dominate ({} vs {})", p, n),
            ));
        }
        if n >= 2 * p {
            return Some((
                Strategy::Neural,
                DOMINANCE_CONFIDENCE,
                format!("neural keywords dominate ({} vs {})", n, p),
            ));
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct LlmClassification {
    strategy: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: Option<String>,
}

const CLASSIFY_SYSTEM_PROMPT: &str = "You route 3D content requests. \
Answer with a single JSON object: {\"strategy\": \"procedural\" | \"neural\" | \"hybrid\", \
\"confidence\": number between 0 and 1, \"reasoning\": short string}.\n\
procedural: hard-surface, architectural, mechanical or scene edits built from primitives and scripts.\n\
neural: organic shapes, characters, creatures, nature, sculptures generated by an AI 3D model.\n\
hybrid: neural generation followed by rigging, animation or export post-processing.";

pub struct StrategyRouter {
    llm: Arc<dyn LlmClient>,
}

impl StrategyRouter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    #[tracing::instrument(name = "router.classify", skip(self, request, options))]
    pub async fn classify(&self, request: &str, options: &ClassifyOptions) -> StrategyDecision {
        if let Some(strategy) = options.override_strategy {
            info!(%strategy, "strategy overridden by user");
            return StrategyDecision::new(
                strategy,
                OVERRIDE_CONFIDENCE,
                "strategy chosen by the user".to_string(),
                ClassificationMethod::UserOverride,
            );
        }

        let scores = score_keywords(request);
        debug!(?scores, "keyword scores");

        if let Some((strategy, confidence, reasoning)) = decide_from_scores(scores) {
            info!(%strategy, confidence, "classified by keywords");
            return StrategyDecision::new(
                strategy,
                confidence,
                reasoning,
                ClassificationMethod::Keyword,
            );
        }

        if options.keyword_only {
            return StrategyDecision::new(
                Strategy::Procedural,
                FALLBACK_CONFIDENCE,
                format!(
                    "ambiguous keywords (procedural {}, neural {}); defaulting to procedural",
                    scores.procedural, scores.neural
                ),
                ClassificationMethod::Keyword,
            );
        }

        self.classify_with_llm(request, scores, options.scene_context.as_deref())
            .await
    }

    async fn classify_with_llm(
        &self,
        request: &str,
        scores: KeywordScores,
        scene_context: Option<&str>,
    ) -> StrategyDecision {
        let mut prompt = format!(
            "Request: {}\nKeyword scores: procedural={}, neural={}, hybrid={}",
            request, scores.procedural, scores.neural, scores.hybrid
        );
        if let Some(scene) = scene_context {
            prompt.push_str("\nCurrent scene: ");
            prompt.push_str(scene);
        }

        let llm_request = LlmRequest::prompt(prompt)
            .with_system(CLASSIFY_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .json();

        let failure = |reason: String| {
            warn!(%reason, "llm classification failed, defaulting to procedural");
            StrategyDecision::new(
                Strategy::Procedural,
                FALLBACK_CONFIDENCE,
                format!("classification failed ({}); defaulting to procedural", reason),
                ClassificationMethod::Llm,
            )
        };

        let text = match self.llm.generate(llm_request).await {
            Ok(text) => text,
            Err(e) => return failure(e.to_string()),
        };
        let parsed: LlmClassification = match parse_json_object(&text) {
            Ok(parsed) => parsed,
            Err(e) => return failure(e.to_string()),
        };
        let strategy = match parsed.strategy.parse::<Strategy>() {
            Ok(s) => s,
            Err(e) => return failure(e),
        };

        let confidence = parsed
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(LLM_DEFAULT_CONFIDENCE);
        info!(%strategy, confidence, "classified by llm");

        StrategyDecision::new(
            strategy,
            confidence,
            parsed
                .reasoning
                .unwrap_or_else(|| "classified by language model".to_string()),
            ClassificationMethod::Llm,
        )
    }
}
