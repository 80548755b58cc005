//! Tool catalog - every command the 3D application's listener accepts.
//!
//! The planner never shows the whole catalog to the model. It asks
//! [`filter_relevant_tools`] for the groups the request mentions, which keeps
//! prompts short and cuts down on invented actions.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The introspection tool that every plan starts with.
pub const BASELINE_TOOL: &str = "get_scene_info";

/// Plans longer than this get the code-execution group regardless of
/// keywords.
pub const ADVANCED_STEP_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Inspection,
    Geometry,
    Materials,
    Lighting,
    Camera,
    Assets,
    Advanced,
    Other,
}

/// External asset library a tool depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetProvider {
    PolyHaven,
    Sketchfab,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AssetProvider>,
}

const fn tool(name: &'static str, description: &'static str, category: ToolCategory) -> ToolSpec {
    ToolSpec {
        name,
        description,
        category,
        provider: None,
    }
}

const fn asset_tool(
    name: &'static str,
    description: &'static str,
    provider: AssetProvider,
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        category: ToolCategory::Assets,
        provider: Some(provider),
    }
}

static TOOLS: &[ToolSpec] = &[
    // Inspection
    tool(
        "get_scene_info",
        "List objects, materials, lights and cameras in the current scene",
        ToolCategory::Inspection,
    ),
    tool(
        "get_object_info",
        "Detailed transform, mesh and material data for one object (params: name)",
        ToolCategory::Inspection,
    ),
    tool(
        "get_viewport_screenshot",
        "Capture the active viewport as an image (params: max_size)",
        ToolCategory::Inspection,
    ),
    // Geometry
    tool(
        "create_object",
        "Add a primitive mesh (params: type CUBE|SPHERE|CYLINDER|CONE|TORUS|PLANE, name, location, rotation, scale)",
        ToolCategory::Geometry,
    ),
    tool(
        "modify_object",
        "Change an object's transform or visibility (params: name, location, rotation, scale, visible)",
        ToolCategory::Geometry,
    ),
    tool(
        "delete_object",
        "Remove an object from the scene (params: name)",
        ToolCategory::Geometry,
    ),
    tool(
        "apply_modifier",
        "Add and apply a modifier such as BEVEL, SUBSURF, ARRAY, MIRROR, SOLIDIFY (params: name, modifier, settings)",
        ToolCategory::Geometry,
    ),
    tool(
        "boolean_operation",
        "Combine two meshes with UNION, DIFFERENCE or INTERSECT (params: target, cutter, operation)",
        ToolCategory::Geometry,
    ),
    // Materials
    tool(
        "create_material",
        "Create a principled material (params: name, base_color, metallic, roughness)",
        ToolCategory::Materials,
    ),
    tool(
        "set_material",
        "Assign a material to an object, creating it if needed (params: object_name, material_name, color)",
        ToolCategory::Materials,
    ),
    tool(
        "set_texture",
        "Apply a downloaded texture set to an object (params: object_name, texture_id)",
        ToolCategory::Materials,
    ),
    // Lighting
    tool(
        "create_light",
        "Add a POINT, SUN, SPOT or AREA light (params: type, name, location, energy, color)",
        ToolCategory::Lighting,
    ),
    tool(
        "set_world_background",
        "Set the world background color or strength (params: color, strength)",
        ToolCategory::Lighting,
    ),
    // Camera
    tool(
        "create_camera",
        "Add a camera and optionally make it active (params: name, location, rotation, lens, active)",
        ToolCategory::Camera,
    ),
    tool(
        "render_image",
        "Render the active camera to a file (params: output_path, resolution_x, resolution_y)",
        ToolCategory::Camera,
    ),
    // Assets
    asset_tool(
        "search_polyhaven_assets",
        "Search Poly Haven for HDRIs, textures or models (params: asset_type, categories)",
        AssetProvider::PolyHaven,
    ),
    asset_tool(
        "download_polyhaven_asset",
        "Download and import a Poly Haven asset (params: asset_id, asset_type, resolution)",
        AssetProvider::PolyHaven,
    ),
    asset_tool(
        "search_sketchfab_models",
        "Search Sketchfab for downloadable models (params: query, count)",
        AssetProvider::Sketchfab,
    ),
    asset_tool(
        "download_sketchfab_model",
        "Download and import a Sketchfab model (params: uid)",
        AssetProvider::Sketchfab,
    ),
    tool(
        "import_model",
        "Import a local GLB, FBX or OBJ file (params: filepath, name)",
        ToolCategory::Assets,
    ),
    // Advanced
    tool(
        "execute_code",
        "Run arbitrary Python in the application (params: code). Use only when no other tool fits",
        ToolCategory::Advanced,
    ),
    // Other
    tool(
        "save_file",
        "Save the current scene to a .blend file (params: filepath)",
        ToolCategory::Other,
    ),
];

pub fn all_tools() -> &'static [ToolSpec] {
    TOOLS
}

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

pub fn is_known_tool(name: &str) -> bool {
    find_tool(name).is_some()
}

/// Known and not switched off by `toggles`.
pub fn is_enabled_tool(name: &str, toggles: ToolToggles) -> bool {
    find_tool(name).is_some_and(|t| toggles.allows(t))
}

/// Project-level switches for asset-library tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolToggles {
    pub polyhaven: bool,
    pub sketchfab: bool,
}

impl Default for ToolToggles {
    fn default() -> Self {
        Self::from(&meshconf::ToolsConfig::default())
    }
}

impl From<&meshconf::ToolsConfig> for ToolToggles {
    fn from(config: &meshconf::ToolsConfig) -> Self {
        Self {
            polyhaven: config.polyhaven,
            sketchfab: config.sketchfab,
        }
    }
}

impl ToolToggles {
    fn allows(&self, tool: &ToolSpec) -> bool {
        match tool.provider {
            Some(AssetProvider::PolyHaven) => self.polyhaven,
            Some(AssetProvider::Sketchfab) => self.sketchfab,
            None => true,
        }
    }
}

fn category_patterns() -> &'static [(ToolCategory, Regex)] {
    static PATTERNS: OnceLock<Vec<(ToolCategory, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                ToolCategory::Inspection,
                r"\b(inspect|what'?s in|list|describe|screenshot|show me|current scene|check)\b",
            ),
            (
                ToolCategory::Geometry,
                r"\b(create|add|make|build|model|cube|sphere|cylinder|cone|torus|plane|mesh|object|move|rotate|scale|delete|remove|bevel|subdivi\w*|boolean|array|mirror|shape)\b",
            ),
            (
                ToolCategory::Materials,
                r"\b(material|color|colou?red|red|green|blue|yellow|black|white|metal\w*|glass|wood\w*|rough\w*|shiny|glossy|texture\w*)\b",
            ),
            (
                ToolCategory::Lighting,
                r"\b(light\w*|lamp|sun|spotlight|illuminat\w*|bright\w*|dark\w*|shadow\w*|background|world)\b",
            ),
            (
                ToolCategory::Camera,
                r"\b(camera|render\w*|shot|angle|view|frame|lens|picture|image)\b",
            ),
            (
                ToolCategory::Assets,
                r"\b(poly ?haven|sketchfab|hdri|download|import|asset\w*|library|realistic texture)\b",
            ),
            (
                ToolCategory::Advanced,
                r"\b(script|python|code|custom|procedural\w*|complex|advanced|batch)\b",
            ),
            (ToolCategory::Other, r"\b(save|blend file|\.blend)\b"),
        ]
        .into_iter()
        .filter_map(|(category, pattern)| {
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|re| (category, re))
        })
        .collect()
    })
}

/// Categories whose keywords appear in the request.
pub fn matched_categories(request: &str) -> Vec<ToolCategory> {
    category_patterns()
        .iter()
        .filter(|(_, re)| re.is_match(request))
        .map(|(category, _)| *category)
        .collect()
}

/// Catalog subset relevant to `request`, in catalog order.
///
/// Always contains [`BASELINE_TOOL`]. Adds the advanced group when
/// `step_count_hint` exceeds [`ADVANCED_STEP_THRESHOLD`]. Asset-library tools
/// switched off in `toggles` are dropped even when their keywords match.
/// When nothing matches, the geometry group is offered so the model still
/// has something to build with.
pub fn filter_relevant_tools(
    request: &str,
    step_count_hint: Option<usize>,
    toggles: ToolToggles,
) -> Vec<&'static ToolSpec> {
    let mut categories = matched_categories(request);

    if step_count_hint.is_some_and(|n| n > ADVANCED_STEP_THRESHOLD)
        && !categories.contains(&ToolCategory::Advanced)
    {
        categories.push(ToolCategory::Advanced);
    }
    if categories.is_empty() {
        categories.push(ToolCategory::Geometry);
    }

    TOOLS
        .iter()
        .filter(|t| t.name == BASELINE_TOOL || categories.contains(&t.category))
        .filter(|t| toggles.allows(t))
        .collect()
}

/// One line per tool, for prompts.
pub fn render_tool_list(tools: &[&ToolSpec]) -> String {
    tools
        .iter()
        .map(|t| format!("- {} ({:?}): {}", t.name, t.category, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}
