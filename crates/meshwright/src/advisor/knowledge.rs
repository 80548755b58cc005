//! Static per-category guidance and the per-strategy fallback templates.

use super::{RecommendedTool, StepCategory};
use crate::router::Strategy;

#[derive(Debug, Clone, Copy)]
pub struct CategoryKnowledge {
    pub category: StepCategory,
    pub title: &'static str,
    pub description: &'static str,
    pub default_tool: RecommendedTool,
    pub alternatives: &'static [RecommendedTool],
    pub estimate: &'static str,
    pub tip: Option<&'static str>,
}

use RecommendedTool::{Manual, Neural, ProceduralAgent};

static KNOWLEDGE: [CategoryKnowledge; 12] = [
    CategoryKnowledge {
        category: StepCategory::Concept,
        title: "Gather references",
        description: "Collect reference images and settle proportions, style and scale before modelling.",
        default_tool: Manual,
        alternatives: &[Neural],
        estimate: "15-30 min",
        tip: Some("A single clean front-view image makes image-to-3D generation far more reliable."),
    },
    CategoryKnowledge {
        category: StepCategory::BaseMesh,
        title: "Block out the base mesh",
        description: "Produce the primary form of the asset.",
        default_tool: ProceduralAgent,
        alternatives: &[Neural, Manual],
        estimate: "5-20 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Detailing,
        title: "Add secondary detail",
        description: "Bevels, insets and modifiers for hard-surface detail, or sculpted forms for organic shapes.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "10-40 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Texturing,
        title: "Texture the surface",
        description: "Paint or generate base colour and surface textures on the mesh.",
        default_tool: Neural,
        alternatives: &[Manual],
        estimate: "2-10 min",
        tip: Some("Texture after cleanup so the texture survives mesh edits."),
    },
    CategoryKnowledge {
        category: StepCategory::Materials,
        title: "Assign materials",
        description: "Create PBR materials and assign them to the object's parts.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "5-15 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Retopology,
        title: "Retopologise",
        description: "Reduce the face count to a production budget while keeping the silhouette.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "2-30 min",
        tip: Some("Generated meshes are dense; decimate before rigging."),
    },
    CategoryKnowledge {
        category: StepCategory::UvUnwrap,
        title: "Unwrap UVs",
        description: "Lay out UV islands for texturing and baking.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "2-20 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Rigging,
        title: "Rig the model",
        description: "Add an armature and bind the mesh with automatic weights.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "10-60 min",
        tip: Some("Check deformation at the joints; automatic weights need touch-ups on thin parts."),
    },
    CategoryKnowledge {
        category: StepCategory::Animation,
        title: "Animate",
        description: "Keyframe the motion the asset needs.",
        default_tool: Manual,
        alternatives: &[ProceduralAgent],
        estimate: "15-120 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Lighting,
        title: "Light the scene",
        description: "Set up key, fill and rim lights or an HDRI environment.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "5-15 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::SceneLayout,
        title: "Compose the scene",
        description: "Place the asset, camera and supporting props.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "5-20 min",
        tip: None,
    },
    CategoryKnowledge {
        category: StepCategory::Export,
        title: "Export",
        description: "Write the finished asset in the delivery format.",
        default_tool: ProceduralAgent,
        alternatives: &[Manual],
        estimate: "1-5 min",
        tip: Some("GLB keeps materials and animation in one file."),
    },
];

pub fn knowledge(category: StepCategory) -> &'static CategoryKnowledge {
    KNOWLEDGE
        .iter()
        .find(|k| k.category == category)
        .unwrap_or(&KNOWLEDGE[0])
}

/// One entry of a fallback template: category, tool, and provider for neural steps.
pub type TemplateEntry = (StepCategory, RecommendedTool, Option<&'static str>);

const PROCEDURAL: &[TemplateEntry] = &[
    (StepCategory::Concept, Manual, None),
    (StepCategory::BaseMesh, ProceduralAgent, None),
    (StepCategory::Detailing, ProceduralAgent, None),
    (StepCategory::Materials, ProceduralAgent, None),
    (StepCategory::Lighting, ProceduralAgent, None),
    (StepCategory::SceneLayout, ProceduralAgent, None),
    (StepCategory::Export, ProceduralAgent, None),
];

const NEURAL: &[TemplateEntry] = &[
    (StepCategory::Concept, Manual, None),
    (StepCategory::BaseMesh, Neural, Some("hunyuan-shape")),
    (StepCategory::Texturing, Neural, Some("hunyuan-paint")),
    (StepCategory::Retopology, ProceduralAgent, None),
    (StepCategory::UvUnwrap, ProceduralAgent, None),
    (StepCategory::Export, ProceduralAgent, None),
];

const HYBRID: &[TemplateEntry] = &[
    (StepCategory::Concept, Manual, None),
    (StepCategory::BaseMesh, Neural, Some("hunyuan-shape")),
    (StepCategory::Texturing, Neural, Some("hunyuan-paint")),
    (StepCategory::Retopology, ProceduralAgent, None),
    (StepCategory::UvUnwrap, ProceduralAgent, None),
    (StepCategory::Rigging, ProceduralAgent, None),
    (StepCategory::Animation, Manual, None),
    (StepCategory::Export, ProceduralAgent, None),
];

pub fn template(strategy: Strategy) -> &'static [TemplateEntry] {
    match strategy {
        Strategy::Procedural => PROCEDURAL,
        Strategy::Neural => NEURAL,
        Strategy::Hybrid => HYBRID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_knowledge() {
        for k in &KNOWLEDGE {
            assert_eq!(knowledge(k.category).category, k.category);
        }
        assert_eq!(KNOWLEDGE.len(), StepCategory::ALL.len());
    }

    #[test]
    fn test_templates_end_with_export() {
        for strategy in [Strategy::Procedural, Strategy::Neural, Strategy::Hybrid] {
            let steps = template(strategy);
            assert_eq!(steps.last().map(|s| s.0), Some(StepCategory::Export));
            for (_, tool, provider) in steps {
                assert_eq!(provider.is_some(), *tool == RecommendedTool::Neural);
            }
        }
    }
}
