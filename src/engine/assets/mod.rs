// Content loading system
//
// Loaders start asynchronous fetches through an `IoBackend` and report back
// on the owning thread. The `ContentManager` joins many loads into a single
// completion event and propagates disposal to in-flight and loaded content.

mod handle;
mod loader;
mod manager;
mod sprite_sheet;

pub use handle::{
    Content, ContentKind, ContentType, ImageContent, JsonContent, SpriteSheetContent,
    TextContent,
};
pub use loader::{DecodedImage, ImageLoader, JsonLoader, Loader, OnDone, TextLoader};
pub use manager::{
    dispose_all_managers, live_manager_count, ContentManager, ManagerHooks, RequestInfo,
    RequestState,
};
pub use sprite_sheet::{
    convert_animations, FrameRecord, ScaleFilter, SheetFile, SheetImage, SpriteList,
    SpriteSheet, SpriteSheetLoader,
};

/// Broad classes of content failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The manager was used in a way its lifecycle forbids
    Configuration,
    /// Content was requested before every load finished
    NotReady,
    /// No content was registered under the URL
    NotFound,
    /// The resource could not be downloaded
    Transport,
    /// The resource was downloaded but is not valid text/JSON/sheet data
    Parse,
    /// The resource is not a decodable image
    Decode,
}

/// Content loading errors
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content \"{url}\" was first loaded as a \"{first}\", but was loaded again as a \"{second}\"")]
    KindConflict {
        url: String,
        first: ContentKind,
        second: ContentKind,
    },

    #[error("Cannot add content to a ContentManager once content has loaded")]
    Sealed,

    #[error("This ContentManager has been disposed of")]
    Disposed,

    #[error("This ContentManager has not finished loading")]
    NotReady,

    #[error("No content named \"{0}\" was loaded into this ContentManager")]
    NotFound(String),

    #[error("Content \"{url}\" was loaded as a \"{loaded}\", but was accessed as a \"{requested}\"")]
    KindMismatch {
        url: String,
        loaded: ContentKind,
        requested: ContentKind,
    },

    #[error("Failed to download \"{url}\"; HTTP status code {status} was returned")]
    Transport { url: String, status: u16 },

    #[error("Failed to download \"{url}\": {reason}")]
    Network { url: String, reason: String },

    #[error("Failed to read \"{url}\" as UTF-8 text")]
    NotText { url: String },

    #[error("Failed to parse \"{url}\" as JSON")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to load \"{url}\" as a PNG image")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Sprite sheet \"{url}\" is malformed: {reason}")]
    MalformedSheet { url: String, reason: String },

    #[error("Sprite sheet \"{url}\" has no animation named \"{animation}\"")]
    UnknownAnimation { url: String, animation: String },
}

impl ContentError {
    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::KindConflict { .. } | Self::Sealed | Self::Disposed => {
                ErrorCategory::Configuration
            }
            Self::KindMismatch { .. } | Self::UnknownAnimation { .. } => {
                ErrorCategory::Configuration
            }
            Self::NotReady => ErrorCategory::NotReady,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Transport { .. } | Self::Network { .. } => ErrorCategory::Transport,
            Self::NotText { .. } | Self::Parse { .. } | Self::MalformedSheet { .. } => {
                ErrorCategory::Parse
            }
            Self::Decode { .. } => ErrorCategory::Decode,
        }
    }
}
