// Root of a scene: a fixed-size area scaled to fit the window

use glam::Vec2;
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

use super::{Children, ElementBox, ParentNode, TeardownStep};
use crate::core::{run_teardown, DisposeFlag, Disposable, Registry};

thread_local! {
    static VIEWPORTS: Registry<Viewport> = const { Registry::new() };
}

/// Resize every live viewport to a new window size
pub fn resize_all(window: Vec2) {
    let live = VIEWPORTS
        .try_with(|registry| registry.live())
        .unwrap_or_default();
    for viewport in live {
        viewport.resize(window);
    }
}

/// Number of live, undisposed viewports on this thread
pub fn live_viewport_count() -> usize {
    VIEWPORTS.try_with(|registry| registry.len()).unwrap_or(0)
}

/// A `width` x `height` area, uniformly scaled to fit the window and
/// centred in it
pub struct Viewport {
    /// Size in viewport units
    size: Vec2,
    element: RefCell<ElementBox>,
    children: Children,
    disposed: DisposeFlag,
}

impl Viewport {
    const TEARDOWN: [TeardownStep; 3] = [
        TeardownStep::Unregister,
        TeardownStep::DisposeChildren,
        TeardownStep::DetachElement,
    ];

    /// Create a viewport fitted to `window`
    pub fn new(width: f32, height: f32, window: Vec2) -> Rc<Self> {
        let viewport = Rc::new(Self {
            size: Vec2::new(width, height),
            element: RefCell::new(ElementBox {
                size: Vec2::new(width, height),
                ..ElementBox::attached()
            }),
            children: Children::new(),
            disposed: DisposeFlag::new(),
        });
        viewport.resize(window);
        VIEWPORTS.with(|registry| registry.register(&viewport));
        viewport
    }

    /// Refit to a window size: the largest uniform scale that fits, centred
    pub fn resize(&self, window: Vec2) {
        let scale = (window.x / self.size.x).min(window.y / self.size.y);
        let scale = if scale.is_finite() { scale.max(0.0) } else { 0.0 };
        let on_screen = self.size * scale;

        let mut element = self.element.borrow_mut();
        element.scale = scale;
        element.position = (window - on_screen) / 2.0;
        debug!(
            "Viewport {}x{} scaled by {} at {:?}",
            self.size.x, self.size.y, scale, element.position
        );
    }

    /// Size in viewport units
    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub fn element(&self) -> ElementBox {
        *self.element.borrow()
    }
}

impl ParentNode for Viewport {
    fn children(&self) -> &Children {
        &self.children
    }
}

impl Disposable for Viewport {
    fn dispose(&self) {
        if !self.disposed.begin() {
            return;
        }
        run_teardown("Viewport", &Self::TEARDOWN, |step| match step {
            TeardownStep::Unregister => {
                let _ = VIEWPORTS
                    .try_with(|registry| registry.deregister_ptr(self as *const Viewport));
            }
            TeardownStep::DisposeChildren => self.children.dispose_all(),
            TeardownStep::DetachElement => self.element.borrow_mut().attached = false,
            _ => {}
        });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}
