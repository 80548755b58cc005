//! The ten fixed stages of the hybrid pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Geometry,
    Texturing,
    Import,
    Cleanup,
    Retopology,
    UvUnwrap,
    Segmentation,
    Rigging,
    Animation,
    Export,
}

impl StageId {
    /// Every stage in execution order.
    pub const ALL: [StageId; 10] = [
        StageId::Geometry,
        StageId::Texturing,
        StageId::Import,
        StageId::Cleanup,
        StageId::Retopology,
        StageId::UvUnwrap,
        StageId::Segmentation,
        StageId::Rigging,
        StageId::Animation,
        StageId::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Geometry => "geometry",
            StageId::Texturing => "texturing",
            StageId::Import => "import",
            StageId::Cleanup => "cleanup",
            StageId::Retopology => "retopology",
            StageId::UvUnwrap => "uv_unwrap",
            StageId::Segmentation => "segmentation",
            StageId::Rigging => "rigging",
            StageId::Animation => "animation",
            StageId::Export => "export",
        }
    }

    /// Stages that only run when their option flag is set.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            StageId::Segmentation | StageId::Rigging | StageId::Animation
        )
    }

    /// Stages that call a neural provider.
    pub fn is_neural(&self) -> bool {
        matches!(
            self,
            StageId::Geometry | StageId::Texturing | StageId::Segmentation
        )
    }

    /// Stages that operate on the imported object inside the 3D application.
    pub fn needs_scene_object(&self) -> bool {
        !matches!(
            self,
            StageId::Geometry | StageId::Texturing | StageId::Import
        )
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_stages_in_order() {
        assert_eq!(StageId::ALL.len(), 10);
        assert_eq!(StageId::ALL[0], StageId::Geometry);
        assert_eq!(StageId::ALL[9], StageId::Export);
        let mut sorted = StageId::ALL;
        sorted.sort();
        assert_eq!(sorted, StageId::ALL);
    }

    #[test]
    fn test_optional_stages() {
        let optional: Vec<_> = StageId::ALL.iter().filter(|s| s.is_optional()).collect();
        assert_eq!(
            optional,
            vec![&StageId::Segmentation, &StageId::Rigging, &StageId::Animation]
        );
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_value(StageId::UvUnwrap).unwrap(), "uv_unwrap");
    }
}
