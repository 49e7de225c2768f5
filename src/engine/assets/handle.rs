// Content kinds and loaded values

use std::fmt;
use std::rc::Rc;

use super::loader::DecodedImage;
use super::sprite_sheet::SpriteSheet;
use crate::core::Disposable;

/// The loader used for a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Json,
    Image,
    SpriteSheet,
}

impl ContentKind {
    /// Name used in error messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            ContentKind::Text => "Text",
            ContentKind::Json => "Json",
            ContentKind::Image => "Image",
            ContentKind::SpriteSheet => "SpriteSheet",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded value. Cloning is cheap; every variant is reference counted.
#[derive(Clone)]
pub enum Content {
    Text(Rc<str>),
    Json(Rc<serde_json::Value>),
    Image(Rc<DecodedImage>),
    SpriteSheet(Rc<SpriteSheet>),
}

impl Content {
    /// The kind of loader that produced this value
    pub fn kind(&self) -> ContentKind {
        match self {
            Content::Text(_) => ContentKind::Text,
            Content::Json(_) => ContentKind::Json,
            Content::Image(_) => ContentKind::Image,
            Content::SpriteSheet(_) => ContentKind::SpriteSheet,
        }
    }

    /// Release whatever the value owns beyond its memory
    pub fn dispose(&self) {
        if let Content::SpriteSheet(sheet) = self {
            sheet.dispose();
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Content::Json(_) => f.write_str("Json(..)"),
            Content::Image(image) => write!(f, "Image({}x{})", image.width(), image.height()),
            Content::SpriteSheet(sheet) => {
                write!(f, "SpriteSheet({} animations)", sheet.animation_count())
            }
        }
    }
}

/// Type-level view of a content kind, for typed retrieval
///
/// The marker types below let callers write
/// `manager.get_as::<SpriteSheetContent>("hero")` and receive an
/// `Rc<SpriteSheet>` directly.
pub trait ContentType {
    const KIND: ContentKind;
    type Value;

    /// Unwrap the matching variant
    fn extract(content: Content) -> Option<Self::Value>;
}

// Marker types for the content kinds
pub struct TextContent;
pub struct JsonContent;
pub struct ImageContent;
pub struct SpriteSheetContent;

impl ContentType for TextContent {
    const KIND: ContentKind = ContentKind::Text;
    type Value = Rc<str>;

    fn extract(content: Content) -> Option<Self::Value> {
        match content {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl ContentType for JsonContent {
    const KIND: ContentKind = ContentKind::Json;
    type Value = Rc<serde_json::Value>;

    fn extract(content: Content) -> Option<Self::Value> {
        match content {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl ContentType for ImageContent {
    const KIND: ContentKind = ContentKind::Image;
    type Value = Rc<DecodedImage>;

    fn extract(content: Content) -> Option<Self::Value> {
        match content {
            Content::Image(image) => Some(image),
            _ => None,
        }
    }
}

impl ContentType for SpriteSheetContent {
    const KIND: ContentKind = ContentKind::SpriteSheet;
    type Value = Rc<SpriteSheet>;

    fn extract(content: Content) -> Option<Self::Value> {
        match content {
            Content::SpriteSheet(sheet) => Some(sheet),
            _ => None,
        }
    }
}
