// Asset pipeline: converts Aseprite exports into sprite sheet files
//
// `aseprite` holds the pure conversion from Aseprite's JSON export to the
// runtime's sheet format. `task` drives the exporter over a set of source
// files and writes `<dest>.png` / `<dest>.json` pairs.

pub mod aseprite;
pub mod task;

pub use aseprite::{convert_animation, convert_export, convert_frame, AsepriteExport, FrameTag};
pub use task::{pairs_from_sources, AsepriteCli, ConvertTask, Exporter, FilePair};

use std::path::PathBuf;

/// Conversion errors
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Animation direction \"{direction}\" is not implemented in animation \"{animation}\"")]
    UnsupportedDirection { direction: String, animation: String },

    #[error("No animations have been defined in file \"{}\"", .0.display())]
    NoAnimations(PathBuf),

    #[error("No .ase file provided to generate sprite sheet \"{}\"", .0.display())]
    MissingSource(PathBuf),

    #[error("Multiple .ase files ({sources}) conflict over sprite sheet \"{}\"", dest.display())]
    ConflictingSources { dest: PathBuf, sources: String },

    #[error("Failed to invoke Aseprite to convert \"{}\"; {reason}", input.display())]
    Export { input: PathBuf, reason: String },

    #[error("Failed to {action} \"{}\"", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse Aseprite export \"{}\"", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConversionError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
