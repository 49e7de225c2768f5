// Aseprite JSON export -> sprite sheet file

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::ConversionError;
use crate::engine::assets::SheetFile;

/// Aseprite's `--format json-array` export
#[derive(Debug, Clone, Deserialize)]
pub struct AsepriteExport {
    pub frames: Vec<AsepriteFrame>,
    pub meta: AsepriteMeta,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AsepriteRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AsepriteSize {
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsepriteFrame {
    /// Trimmed frame rectangle inside the packed sheet
    pub frame: AsepriteRect,
    /// Untrimmed canvas size
    pub source_size: AsepriteSize,
    /// Trimmed rectangle inside the untrimmed canvas
    pub sprite_source_size: AsepriteRect,
    /// Milliseconds
    pub duration: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsepriteMeta {
    #[serde(default)]
    pub frame_tags: Vec<FrameTag>,
}

/// A named frame range with a playback direction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameTag {
    pub name: String,
    pub from: usize,
    pub to: usize,
    pub direction: String,
}

/// Expand a frame tag into frame indices
pub fn convert_animation(tag: &FrameTag) -> Result<Vec<usize>, ConversionError> {
    let (from, to) = (tag.from, tag.to);
    match tag.direction.as_str() {
        "forward" => Ok((from..=to).collect()),
        "reverse" => Ok((from..=to).rev().collect()),
        "pingpong" => Ok((from..=to)
            .chain((from.saturating_add(1)..to).rev())
            .collect()),
        other => Err(ConversionError::UnsupportedDirection {
            direction: other.to_string(),
            animation: tag.name.clone(),
        }),
    }
}

/// Convert one exported frame to `[x0, y0, x1, y1, pivot_x, pivot_y, seconds]`.
///
/// The pivot is the centre of the untrimmed canvas.
pub fn convert_frame(frame: &AsepriteFrame) -> [f32; 7] {
    let rect = frame.frame;
    [
        rect.x,
        rect.y,
        rect.x + rect.w - 1.0,
        rect.y + rect.h - 1.0,
        rect.x + frame.source_size.w / 2.0 - frame.sprite_source_size.x,
        rect.y + frame.source_size.h / 2.0 - frame.sprite_source_size.y,
        frame.duration / 1000.0,
    ]
}

/// Convert a whole export. `source` names the file in errors.
pub fn convert_export(json: &str, source: &Path) -> Result<SheetFile, ConversionError> {
    let export: AsepriteExport =
        serde_json::from_str(json).map_err(|e| ConversionError::Json {
            path: source.to_path_buf(),
            source: e,
        })?;

    if export.meta.frame_tags.is_empty() {
        return Err(ConversionError::NoAnimations(source.to_path_buf()));
    }

    let mut animations = BTreeMap::new();
    for tag in &export.meta.frame_tags {
        animations.insert(tag.name.clone(), convert_animation(tag)?);
    }

    Ok(SheetFile {
        frames: export.frames.iter().map(convert_frame).collect(),
        animations,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Two 16x24 frames trimmed out of a 32x32 canvas, one tag of each kind
    pub const EXPORT_JSON: &str = r#"{
        "frames": [
            {
                "filename": "hero 0.ase",
                "frame": { "x": 1, "y": 1, "w": 16, "h": 24 },
                "rotated": false,
                "trimmed": true,
                "spriteSourceSize": { "x": 8, "y": 4, "w": 16, "h": 24 },
                "sourceSize": { "w": 32, "h": 32 },
                "duration": 100
            },
            {
                "filename": "hero 1.ase",
                "frame": { "x": 18, "y": 1, "w": 14, "h": 24 },
                "rotated": false,
                "trimmed": true,
                "spriteSourceSize": { "x": 9, "y": 4, "w": 14, "h": 24 },
                "sourceSize": { "w": 32, "h": 32 },
                "duration": 250
            }
        ],
        "meta": {
            "app": "http://www.aseprite.org/",
            "frameTags": [
                { "name": "idle", "from": 0, "to": 0, "direction": "forward" },
                { "name": "walk", "from": 0, "to": 1, "direction": "pingpong" }
            ]
        }
    }"#;
}
