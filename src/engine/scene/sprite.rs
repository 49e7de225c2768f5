// Sprites: a window onto a sprite sheet, stepped through its animations

use log::debug;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::{ElementBox, ParentNode, SceneError, TeardownStep};
use crate::core::{run_teardown, DisposeFlag, Disposable};
use crate::engine::assets::{
    ContentError, ContentManager, FrameRecord, SheetImage, SpriteSheet,
};
use crate::engine::timer::{AnimationClock, ClockHooks, Scheduler};

type Then = Box<dyn FnOnce()>;

pub struct Sprite {
    parent: Weak<dyn ParentNode>,
    sheet: Rc<SpriteSheet>,
    /// Private copy of the sheet image
    image: SheetImage,
    element: RefCell<ElementBox>,
    /// Clock of the frame currently shown
    playback: RefCell<Option<AnimationClock>>,
    disposed: DisposeFlag,
}

impl Sprite {
    const TEARDOWN: [TeardownStep; 4] = [
        TeardownStep::StopPlayback,
        TeardownStep::UnbindSheet,
        TeardownStep::DetachElement,
        TeardownStep::RemoveFromParent,
    ];

    /// Create a sprite showing a sheet loaded by `manager`.
    ///
    /// The manager must have finished loading. The sprite is disposed along
    /// with the sheet.
    pub fn new<P: ParentNode + 'static>(
        parent: &Rc<P>,
        manager: &ContentManager,
        url: &str,
    ) -> Result<Rc<Self>, SceneError> {
        if parent.is_disposed() {
            return Err(SceneError::ParentDisposed);
        }
        let sheet = manager.sprite_sheet(url)?;
        let parent_dyn: Rc<dyn ParentNode> = parent.clone();

        let sprite = Rc::new(Self {
            parent: Rc::downgrade(&parent_dyn),
            image: sheet.image().clone(),
            sheet,
            element: RefCell::new(ElementBox::attached()),
            playback: RefCell::new(None),
            disposed: DisposeFlag::new(),
        });

        let bound: Rc<dyn Disposable> = sprite.clone();
        sprite.sheet.sprites().bind(Rc::downgrade(&bound));
        parent.children().attach(bound);
        Ok(sprite)
    }

    /// Play an animation once, then call `then`.
    ///
    /// Starting another animation replaces the current one; its `then` is
    /// never called. Disposing the sprite stops playback.
    pub fn play(
        self: &Rc<Self>,
        animation: &str,
        scheduler: &Scheduler,
        then: impl FnOnce() + 'static,
    ) -> Result<(), SceneError> {
        let frames = self.sheet.animation(animation).ok_or_else(|| {
            ContentError::UnknownAnimation {
                url: self.sheet.url().to_string(),
                animation: animation.to_string(),
            }
        })?;
        if self.is_disposed() {
            return Ok(());
        }
        debug!(
            "Playing \"{}\" from \"{}\" ({} frames)",
            animation,
            self.sheet.url(),
            frames.len()
        );
        show_frame(self, frames, 0, scheduler.clone(), Box::new(then));
        Ok(())
    }

    /// Freeze the current frame
    pub fn pause(&self) {
        if let Some(clock) = self.playback.borrow().as_ref() {
            clock.pause();
        }
    }

    /// Continue after [`Sprite::pause`]
    pub fn resume(&self) {
        if let Some(clock) = self.playback.borrow().as_ref() {
            clock.resume();
        }
    }

    /// Check whether an animation is in progress
    pub fn is_playing(&self) -> bool {
        self.playback.borrow().is_some()
    }

    pub fn set_position(&self, position: glam::Vec2) {
        self.element.borrow_mut().position = position;
    }

    pub fn element(&self) -> ElementBox {
        *self.element.borrow()
    }

    pub fn image(&self) -> &SheetImage {
        &self.image
    }

    pub fn sheet(&self) -> &Rc<SpriteSheet> {
        &self.sheet
    }

    fn apply_frame(&self, frame: &FrameRecord) {
        let mut element = self.element.borrow_mut();
        element.image_offset = frame.image_offset;
        element.size = frame.size;
        element.margin = frame.margin;
    }
}

/// Frame durations are stored in seconds; round to whole microseconds
fn frame_duration(seconds: f32) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_micros((f64::from(seconds) * 1e6).round() as u64)
    } else {
        Duration::ZERO
    }
}

fn show_frame(
    sprite: &Rc<Sprite>,
    frames: Rc<[FrameRecord]>,
    index: usize,
    scheduler: Scheduler,
    then: Then,
) {
    if sprite.is_disposed() {
        return;
    }
    let Some(frame) = frames.get(index).copied() else {
        // Clear first so `then` may start another animation
        let finished = sprite.playback.borrow_mut().take();
        drop(finished);
        then();
        return;
    };
    sprite.apply_frame(&frame);

    let duration = frame_duration(frame.duration);
    let weak: Weak<Sprite> = Rc::downgrade(sprite);
    let next_scheduler = scheduler.clone();
    let clock = AnimationClock::new(
        &scheduler,
        duration,
        ClockHooks::new().on_completed(move || {
            if let Some(sprite) = weak.upgrade() {
                show_frame(&sprite, frames, index + 1, next_scheduler, then);
            }
        }),
    );
    clock.resume();

    let previous = sprite.playback.borrow_mut().replace(clock);
    drop(previous);
}

impl Disposable for Sprite {
    fn dispose(&self) {
        if !self.disposed.begin() {
            return;
        }
        run_teardown("Sprite", &Self::TEARDOWN, |step| match step {
            TeardownStep::StopPlayback => {
                let clock = self.playback.borrow_mut().take();
                if let Some(clock) = clock {
                    clock.stop();
                }
            }
            TeardownStep::UnbindSheet => {
                self.sheet.sprites().unbind(self as *const Sprite as *const ());
            }
            TeardownStep::DetachElement => self.element.borrow_mut().attached = false,
            TeardownStep::RemoveFromParent => {
                if let Some(parent) = self.parent.upgrade() {
                    parent.children().detach(self as *const Sprite as *const ());
                }
            }
            _ => {}
        });
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Group, Viewport};
    use super::*;
    use crate::engine::assets::{ContentKind, ManagerHooks};
    use crate::engine::io::scripted::{png_bytes, ScriptedIo, HERO_JSON};
    use crate::engine::timer::ManualClock;
    use approx::assert_relative_eq;
    use glam::Vec2;
    use std::cell::Cell;

    struct Stage {
        io: ScriptedIo,
        manager: ContentManager,
        viewport: Rc<Viewport>,
        time: ManualClock,
        scheduler: Scheduler,
    }

    fn stage() -> Stage {
        let io = ScriptedIo::new();
        let manager = ContentManager::new(Rc::new(io.clone()), ManagerHooks::new());
        manager.add(ContentKind::SpriteSheet, "hero").unwrap();
        io.respond("hero.json", 200, HERO_JSON).unwrap();
        io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();

        let time = ManualClock::new();
        Stage {
            io,
            manager,
            viewport: Viewport::new(320.0, 180.0, Vec2::new(320.0, 180.0)),
            scheduler: Scheduler::new(time.clone()),
            time,
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_frame_duration_rounding() {
        assert_eq!(frame_duration(0.15), ms(150));
        assert_eq!(frame_duration(-1.0), Duration::ZERO);
        assert_eq!(frame_duration(f32::NAN), Duration::ZERO);
    }

    #[test]
    fn test_sprite_binds_to_sheet_and_parent() {
        let s = stage();
        let sprite = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();

        assert_eq!(sprite.sheet().sprites().len(), 1);
        assert_eq!(s.viewport.children().len(), 1);
        assert_eq!(sprite.image().width(), 48);
        assert!(s.io.cancelled().is_empty());
    }

    #[test]
    fn test_sprite_needs_loaded_sheet() {
        let io = ScriptedIo::new();
        let manager = ContentManager::new(Rc::new(io.clone()), ManagerHooks::new());
        manager.add(ContentKind::SpriteSheet, "hero").unwrap();
        let viewport = Viewport::new(10.0, 10.0, Vec2::new(10.0, 10.0));

        assert!(matches!(
            Sprite::new(&viewport, &manager, "hero"),
            Err(SceneError::Content(ContentError::NotReady))
        ));
        assert!(viewport.children().is_empty());
    }

    #[test]
    fn test_play_walks_frames_then_calls_back() {
        let s = stage();
        let sprite = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();

        sprite.play("walk", &s.scheduler, move || flag.set(true)).unwrap();

        // Frame 1: [16, 0, 31, 22] with pivot (24, 19.5)
        let element = sprite.element();
        assert_eq!(element.image_offset, Vec2::new(-16.0, 0.0));
        assert_eq!(element.size, Vec2::new(16.0, 23.0));
        assert_relative_eq!(element.margin.x, -8.0);
        assert_relative_eq!(element.margin.y, -19.5);

        s.time.advance(ms(150));
        s.scheduler.run_due();
        // Frame 2: [32, 0, 45, 23]
        assert_eq!(sprite.element().image_offset, Vec2::new(-32.0, 0.0));
        assert_eq!(sprite.element().size, Vec2::new(14.0, 24.0));

        s.time.advance(ms(200));
        s.scheduler.run_due();
        assert_eq!(sprite.element().image_offset, Vec2::new(-16.0, 0.0));
        assert!(!done.get());

        s.time.advance(ms(150));
        s.scheduler.run_due();
        assert!(done.get());
        assert!(!sprite.is_playing());
    }

    #[test]
    fn test_unknown_animation() {
        let s = stage();
        let sprite = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();

        let err = sprite.play("jump", &s.scheduler, || {}).unwrap_err();
        assert!(matches!(
            err,
            SceneError::Content(ContentError::UnknownAnimation { ref animation, .. })
                if animation == "jump"
        ));
    }

    #[test]
    fn test_pause_holds_the_frame() {
        let s = stage();
        let sprite = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();
        sprite.play("idle", &s.scheduler, || {}).unwrap();

        sprite.pause();
        s.time.advance(ms(1000));
        s.scheduler.run_due();
        assert_eq!(sprite.element().image_offset, Vec2::new(0.0, 0.0));

        sprite.resume();
        s.time.advance(ms(100));
        s.scheduler.run_due();
        assert_eq!(sprite.element().image_offset, Vec2::new(-16.0, 0.0));
    }

    #[test]
    fn test_dispose_stops_playback() {
        let s = stage();
        let sprite = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        sprite.play("idle", &s.scheduler, move || flag.set(true)).unwrap();

        sprite.dispose();
        s.time.advance(ms(1000));
        s.scheduler.run_due();

        assert!(!done.get());
        assert_eq!(s.scheduler.pending(), 0);
        assert!(sprite.sheet().sprites().is_empty());
        assert!(s.viewport.children().is_empty());
    }

    #[test]
    fn test_manager_disposal_disposes_sprites() {
        let s = stage();
        let group = Group::new(&s.viewport).unwrap();
        let first = Sprite::new(&group, &s.manager, "hero").unwrap();
        let second = Sprite::new(&s.viewport, &s.manager, "hero").unwrap();

        s.manager.dispose();

        assert!(first.is_disposed());
        assert!(second.is_disposed());
        assert!(group.children().is_empty());
        assert_eq!(s.viewport.children().len(), 1);
        assert!(!group.is_disposed());
    }

    #[test]
    fn test_viewport_disposal_cascades_to_sprites() {
        let s = stage();
        let group = Group::new(&s.viewport).unwrap();
        let sprite = Sprite::new(&group, &s.manager, "hero").unwrap();

        s.viewport.dispose();

        assert!(group.is_disposed());
        assert!(sprite.is_disposed());
        assert!(!sprite.element().attached);
        assert!(sprite.sheet().sprites().is_empty());
    }
}
