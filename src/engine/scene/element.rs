// Layout record for a scene node

use glam::Vec2;

/// Where and how large a node is drawn, in viewport units.
///
/// A renderer reads these; nothing here draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementBox {
    /// Top-left corner relative to the parent
    pub position: Vec2,
    /// Size of the clipping window
    pub size: Vec2,
    /// Offset applied after positioning
    pub margin: Vec2,
    /// Offset of the image inside the clipping window
    pub image_offset: Vec2,
    /// Screen pixels per viewport unit
    pub scale: f32,
    /// Whether the element is part of a parent element
    pub attached: bool,
}

impl ElementBox {
    /// An attached box at the parent's origin
    pub fn attached() -> Self {
        Self {
            attached: true,
            ..Self::default()
        }
    }

    /// Top-left corner after applying the margin
    pub fn origin(&self) -> Vec2 {
        self.position + self.margin
    }
}

impl Default for ElementBox {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            size: Vec2::ZERO,
            margin: Vec2::ZERO,
            image_offset: Vec2::ZERO,
            scale: 1.0,
            attached: false,
        }
    }
}
