//! Self-contained Python payloads for the script stages.
//!
//! Every payload ends by printing one JSON object on stdout, which the
//! script executor hands back as the stage's result. Paths and names are
//! embedded as JSON string literals, which Python parses identically.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Glb,
    Fbx,
    Obj,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Glb => "glb",
            ExportFormat::Fbx => "fbx",
            ExportFormat::Obj => "obj",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "glb" | "gltf" => Ok(ExportFormat::Glb),
            "fbx" => Ok(ExportFormat::Fbx),
            "obj" => Ok(ExportFormat::Obj),
            other => Err(format!("unsupported export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationPreset {
    #[default]
    Turntable,
    Idle,
    Bounce,
}

impl FromStr for AnimationPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "turntable" | "spin" => Ok(AnimationPreset::Turntable),
            "idle" | "breathe" => Ok(AnimationPreset::Idle),
            "bounce" => Ok(AnimationPreset::Bounce),
            other => Err(format!("unknown animation preset: {}", other)),
        }
    }
}

fn literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn path_literal(path: &Path) -> String {
    literal(&path.to_string_lossy())
}

const PRELUDE: &str = "\
import bpy
import json

def _select_only(name):
    obj = bpy.data.objects.get(name)
    if obj is None:
        raise RuntimeError('object not found: ' + name)
    bpy.ops.object.select_all(action='DESELECT')
    obj.select_set(True)
    bpy.context.view_layer.objects.active = obj
    return obj
";

/// Import a model file, join its meshes and name the result `object_name`.
/// An existing object with that name is replaced.
pub fn import_model(path: &Path, object_name: &str) -> String {
    format!(
        "{PRELUDE}
path = {path}
name = {name}
old = bpy.data.objects.get(name)
if old is not None:
    bpy.data.objects.remove(old, do_unlink=True)
before = set(bpy.data.objects.keys())
ext = path.rsplit('.', 1)[-1].lower()
if ext in ('glb', 'gltf'):
    bpy.ops.import_scene.gltf(filepath=path)
elif ext == 'fbx':
    bpy.ops.import_scene.fbx(filepath=path)
elif ext == 'obj':
    bpy.ops.wm.obj_import(filepath=path)
else:
    raise ValueError('unsupported model format: ' + ext)
new = [o for o in bpy.data.objects if o.name not in before and o.type == 'MESH']
if not new:
    raise RuntimeError('import produced no mesh objects')
bpy.ops.object.select_all(action='DESELECT')
for o in new:
    o.select_set(True)
bpy.context.view_layer.objects.active = new[0]
if len(new) > 1:
    bpy.ops.object.join()
obj = bpy.context.view_layer.objects.active
obj.name = name
print(json.dumps({{'object': obj.name, 'faces': len(obj.data.polygons)}}))
",
        path = path_literal(path),
        name = literal(object_name),
    )
}

/// Merge duplicate vertices, recalculate normals, drop loose geometry.
pub fn cleanup(object_name: &str) -> String {
    format!(
        "{PRELUDE}
obj = _select_only({name})
bpy.ops.object.mode_set(mode='EDIT')
bpy.ops.mesh.select_all(action='SELECT')
bpy.ops.mesh.remove_doubles(threshold=0.0001)
bpy.ops.mesh.delete_loose()
bpy.ops.mesh.normals_make_consistent(inside=False)
bpy.ops.object.mode_set(mode='OBJECT')
print(json.dumps({{'object': obj.name, 'vertices': len(obj.data.vertices)}}))
",
        name = literal(object_name),
    )
}

/// Decimate down to roughly `target_faces`. Meshes already below the target
/// are left alone.
pub fn retopology(object_name: &str, target_faces: u32) -> String {
    format!(
        "{PRELUDE}
obj = _select_only({name})
target = {target_faces}
faces = len(obj.data.polygons)
if faces > target:
    mod = obj.modifiers.new(name='meshwright_decimate', type='DECIMATE')
    mod.ratio = max(0.01, target / faces)
    bpy.ops.object.modifier_apply(modifier=mod.name)
print(json.dumps({{'object': obj.name, 'faces_before': faces, 'faces': len(obj.data.polygons)}}))
",
        name = literal(object_name),
    )
}

pub fn uv_unwrap(object_name: &str) -> String {
    format!(
        "{PRELUDE}
obj = _select_only({name})
bpy.ops.object.mode_set(mode='EDIT')
bpy.ops.mesh.select_all(action='SELECT')
bpy.ops.uv.smart_project(angle_limit=1.15192, island_margin=0.02)
bpy.ops.object.mode_set(mode='OBJECT')
print(json.dumps({{'object': obj.name, 'uv_layers': len(obj.data.uv_layers)}}))
",
        name = literal(object_name),
    )
}

/// Write the named object alone to `path` in the given format.
pub fn export_object(object_name: &str, path: &Path, format: ExportFormat) -> String {
    let exporter = match format {
        ExportFormat::Glb => "bpy.ops.export_scene.gltf(filepath=path, export_format='GLB', use_selection=True)",
        ExportFormat::Fbx => "bpy.ops.export_scene.fbx(filepath=path, use_selection=True)",
        ExportFormat::Obj => "bpy.ops.wm.obj_export(filepath=path, export_selected_objects=True)",
    };
    format!(
        "{PRELUDE}
import os
obj = _select_only({name})
for child in obj.children_recursive:
    child.select_set(True)
if obj.parent is not None:
    obj.parent.select_set(True)
path = {path}
os.makedirs(os.path.dirname(path) or '.', exist_ok=True)
{exporter}
print(json.dumps({{'object': obj.name, 'path': path}}))
",
        name = literal(object_name),
        path = path_literal(path),
    )
}

/// Single-chain armature sized to the object's bounds, parented with
/// automatic weights.
pub fn auto_rig(object_name: &str) -> String {
    format!(
        "{PRELUDE}
from mathutils import Vector
obj = _select_only({name})
corners = [obj.matrix_world @ Vector(c) for c in obj.bound_box]
low = min(c.z for c in corners)
high = max(c.z for c in corners)
cx = sum(c.x for c in corners) / 8.0
cy = sum(c.y for c in corners) / 8.0
bpy.ops.object.armature_add(enter_editmode=True, location=(cx, cy, low))
arm = bpy.context.view_layer.objects.active
arm.name = obj.name + '_rig'
bones = arm.data.edit_bones
root = bones[0]
root.name = 'root'
root.head = (0, 0, 0)
root.tail = (0, 0, (high - low) * 0.4)
spine = bones.new('spine')
spine.head = root.tail
spine.tail = (0, 0, (high - low) * 0.8)
spine.parent = root
head = bones.new('head')
head.head = spine.tail
head.tail = (0, 0, high - low)
head.parent = spine
bpy.ops.object.mode_set(mode='OBJECT')
bpy.ops.object.select_all(action='DESELECT')
obj.select_set(True)
arm.select_set(True)
bpy.context.view_layer.objects.active = arm
bpy.ops.object.parent_set(type='ARMATURE_AUTO')
print(json.dumps({{'object': obj.name, 'armature': arm.name, 'bones': len(arm.data.bones)}}))
",
        name = literal(object_name),
    )
}

/// Keyframe a looping preset on the object (or its armature when rigged).
pub fn animate(object_name: &str, preset: AnimationPreset, frames: u32) -> String {
    let keys = match preset {
        AnimationPreset::Turntable => {
            "target.rotation_euler = (0, 0, 0)
target.keyframe_insert(data_path='rotation_euler', frame=1)
target.rotation_euler = (0, 0, 6.283185)
target.keyframe_insert(data_path='rotation_euler', frame=end)
for fc in target.animation_data.action.fcurves:
    for kp in fc.keyframe_points:
        kp.interpolation = 'LINEAR'"
        }
        AnimationPreset::Idle => {
            "base = tuple(target.scale)
for frame, factor in ((1, 1.0), (end // 2, 1.02), (end, 1.0)):
    target.scale = tuple(s * factor for s in base)
    target.keyframe_insert(data_path='scale', frame=frame)"
        }
        AnimationPreset::Bounce => {
            "z = target.location.z
for frame, dz in ((1, 0.0), (end // 2, 0.5), (end, 0.0)):
    target.location.z = z + dz
    target.keyframe_insert(data_path='location', index=2, frame=frame)"
        }
    };
    format!(
        "{PRELUDE}
obj = _select_only({name})
target = bpy.data.objects.get(obj.name + '_rig') or obj
end = {frames}
scene = bpy.context.scene
scene.frame_start = 1
scene.frame_end = end
{keys}
print(json.dumps({{'object': obj.name, 'target': target.name, 'frames': end}}))
",
        name = literal(object_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_escaped() {
        let script = cleanup("it's \"quoted\"");
        assert!(script.contains(r#"_select_only("it's \"quoted\"")"#));
    }

    #[test]
    fn test_import_embeds_path_and_name() {
        let script = import_model(Path::new("/tmp/out/a b.glb"), "meshwright_1");
        assert!(script.contains(r#"path = "/tmp/out/a b.glb""#));
        assert!(script.contains(r#"name = "meshwright_1""#));
        assert!(script.contains("print(json.dumps({'object'"));
    }

    #[test]
    fn test_export_picks_operator() {
        let glb = export_object("o", Path::new("/x/o.glb"), ExportFormat::Glb);
        assert!(glb.contains("export_format='GLB'"));
        let fbx = export_object("o", Path::new("/x/o.fbx"), ExportFormat::Fbx);
        assert!(fbx.contains("export_scene.fbx"));
    }

    #[test]
    fn test_retopology_target() {
        assert!(retopology("o", 5000).contains("target = 5000"));
    }

    #[test]
    fn test_format_and_preset_parsing() {
        assert_eq!(".FBX".parse::<ExportFormat>().unwrap(), ExportFormat::Fbx);
        assert!("usdz".parse::<ExportFormat>().is_err());
        assert_eq!("spin".parse::<AnimationPreset>().unwrap(), AnimationPreset::Turntable);
        assert!(animate("o", AnimationPreset::Bounce, 48).contains("end = 48"));
    }
}
