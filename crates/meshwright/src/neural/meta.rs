//! Static descriptors for the closed set of providers.

use serde::Serialize;

use super::GenerationMode;
use crate::stage::StageId;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMeta {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub stages: &'static [StageId],
    pub modes: &'static [GenerationMode],
    pub self_hosted: bool,
    pub output_formats: &'static [&'static str],
    /// `None` for hosted services.
    pub vram_gb: Option<u32>,
    pub estimated_seconds: u32,
    /// Hosted services refuse requests without a key.
    pub requires_api_key: bool,
}

impl ProviderMeta {
    pub fn supports_stage(&self, stage: StageId) -> bool {
        self.stages.contains(&stage)
    }

    pub fn supports_mode(&self, mode: GenerationMode) -> bool {
        self.modes.contains(&mode)
    }
}

static PROVIDERS: [ProviderMeta; 6] = [
    ProviderMeta {
        slug: "hunyuan-shape",
        display_name: "Hunyuan3D Shape",
        stages: &[StageId::Geometry],
        modes: &[GenerationMode::TextTo3d, GenerationMode::ImageTo3d],
        self_hosted: true,
        output_formats: &["glb"],
        vram_gb: Some(6),
        estimated_seconds: 45,
        requires_api_key: false,
    },
    ProviderMeta {
        slug: "hunyuan-paint",
        display_name: "Hunyuan3D Paint",
        stages: &[StageId::Texturing],
        modes: &[GenerationMode::MeshTexturing],
        self_hosted: true,
        output_formats: &["glb"],
        vram_gb: Some(12),
        estimated_seconds: 90,
        requires_api_key: false,
    },
    ProviderMeta {
        slug: "trellis",
        display_name: "TRELLIS",
        stages: &[StageId::Geometry],
        modes: &[GenerationMode::TextTo3d, GenerationMode::ImageTo3d],
        self_hosted: true,
        output_formats: &["glb"],
        vram_gb: Some(16),
        estimated_seconds: 60,
        requires_api_key: false,
    },
    ProviderMeta {
        slug: "partfield",
        display_name: "PartField",
        stages: &[StageId::Segmentation],
        modes: &[GenerationMode::PartSegmentation],
        self_hosted: true,
        output_formats: &["glb"],
        vram_gb: Some(8),
        estimated_seconds: 30,
        requires_api_key: false,
    },
    ProviderMeta {
        slug: "tripo",
        display_name: "Tripo AI",
        stages: &[StageId::Geometry],
        modes: &[GenerationMode::TextTo3d],
        self_hosted: false,
        output_formats: &["glb", "fbx"],
        vram_gb: None,
        estimated_seconds: 40,
        requires_api_key: true,
    },
    ProviderMeta {
        slug: "meshy",
        display_name: "Meshy",
        stages: &[StageId::Geometry],
        modes: &[GenerationMode::TextTo3d, GenerationMode::ImageTo3d],
        self_hosted: false,
        output_formats: &["glb", "fbx", "obj", "usdz"],
        vram_gb: None,
        estimated_seconds: 120,
        requires_api_key: true,
    },
];

pub fn all_meta() -> &'static [ProviderMeta] {
    &PROVIDERS
}

pub fn meta(slug: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|m| m.slug == slug)
}
