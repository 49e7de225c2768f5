// Sprite sheets: a frame table plus one image, loaded as a pair

use glam::Vec2;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use super::loader::{DecodedImage, ImageLoader, JsonLoader, Loader, OnDone};
use super::ContentError;
use crate::core::{CancelToken, DisposeFlag, Disposable};
use crate::engine::io::IoBackend;

/// On-disk sprite sheet description (`<base>.json`)
///
/// Each frame is `[x0, y0, x1, y1, pivot_x, pivot_y, duration_seconds]` with
/// inclusive pixel bounds. Animations list frame indices in playback order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetFile {
    pub frames: Vec<[f32; 7]>,
    pub animations: BTreeMap<String, Vec<usize>>,
}

/// Render-ready description of one animation frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    /// Offset applied to the sheet image so the frame's crop sits at the origin
    pub image_offset: Vec2,
    /// Size of the crop window
    pub size: Vec2,
    /// Margin aligning the crop to the animation's pivot
    pub margin: Vec2,
    /// How long the frame is shown, in seconds
    pub duration: f32,
}

impl FrameRecord {
    /// Convert a raw frame entry
    pub fn from_frame(frame: &[f32; 7]) -> Self {
        let [x0, y0, x1, y1, pivot_x, pivot_y, duration] = *frame;
        Self {
            image_offset: Vec2::new(-x0, -y0),
            size: Vec2::new(1.0 + x1 - x0, 1.0 + y1 - y0),
            margin: Vec2::new(x0 - pivot_x, y0 - pivot_y),
            duration,
        }
    }
}

/// Convert every animation in a sheet file into frame records.
///
/// Pure and deterministic: the same file always yields the same map.
pub fn convert_animations(
    url: &str,
    file: &SheetFile,
) -> Result<BTreeMap<String, Rc<[FrameRecord]>>, ContentError> {
    let mut animations = BTreeMap::new();

    for (name, indices) in &file.animations {
        let mut records = Vec::with_capacity(indices.len());
        for &index in indices {
            let frame = file
                .frames
                .get(index)
                .ok_or_else(|| ContentError::MalformedSheet {
                    url: url.to_string(),
                    reason: format!(
                        "animation \"{}\" refers to frame {} but only {} frames exist",
                        name,
                        index,
                        file.frames.len()
                    ),
                })?;
            records.push(FrameRecord::from_frame(frame));
        }
        animations.insert(name.clone(), Rc::from(records));
    }

    Ok(animations)
}

/// How an image should be scaled when drawn larger than its pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFilter {
    Nearest,
    Linear,
}

/// The sheet's private copy of its image
#[derive(Debug, Clone)]
pub struct SheetImage {
    pub pixels: RgbaImage,
    pub filter: ScaleFilter,
}

impl SheetImage {
    /// Copy a decoded image, tagged for pixel-art scaling
    pub fn pixelated(image: &DecodedImage) -> Self {
        Self {
            pixels: image.pixels().clone(),
            filter: ScaleFilter::Nearest,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Live list of objects bound to a sheet, disposed along with it
#[derive(Clone, Default)]
pub struct SpriteList {
    entries: Rc<RefCell<Vec<Weak<dyn Disposable>>>>,
}

impl SpriteList {
    /// Bind an object to the sheet.
    ///
    /// Objects dropped without being disposed are forgotten here.
    pub fn bind(&self, sprite: Weak<dyn Disposable>) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(sprite);
    }

    /// Unbind an object; returns `false` if it was not bound
    pub fn unbind(&self, sprite: *const ()) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(index) = entries
            .iter()
            .position(|entry| entry.as_ptr() as *const () == sprite)
        else {
            return false;
        };
        entries.remove(index);
        true
    }

    /// Number of bound objects still alive
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every bound object, draining the list until it is empty
    pub fn dispose_all(&self) {
        loop {
            // Disposal unbinds, so never hold the borrow across it
            let next = {
                let mut entries = self.entries.borrow_mut();
                if entries.is_empty() {
                    None
                } else {
                    Some(entries.remove(0))
                }
            };
            match next {
                Some(entry) => {
                    if let Some(sprite) = entry.upgrade() {
                        sprite.dispose();
                    }
                }
                None => break,
            }
        }
    }
}

/// A loaded sprite sheet
pub struct SpriteSheet {
    url: String,
    animations: BTreeMap<String, Rc<[FrameRecord]>>,
    image: SheetImage,
    sprites: SpriteList,
    disposed: DisposeFlag,
}

impl SpriteSheet {
    /// Merge a parsed sheet file and its decoded image
    pub fn assemble(
        url: &str,
        file: &SheetFile,
        image: &DecodedImage,
        sprites: SpriteList,
    ) -> Result<Self, ContentError> {
        Ok(Self {
            url: url.to_string(),
            animations: convert_animations(url, file)?,
            image: SheetImage::pixelated(image),
            sprites,
            disposed: DisposeFlag::new(),
        })
    }

    /// Base URL the sheet was loaded from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Frames of an animation by name
    pub fn animation(&self, name: &str) -> Option<Rc<[FrameRecord]>> {
        self.animations.get(name).cloned()
    }

    /// Animation names, sorted
    pub fn animation_names(&self) -> impl Iterator<Item = &str> {
        self.animations.keys().map(String::as_str)
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    pub fn image(&self) -> &SheetImage {
        &self.image
    }

    /// Objects currently bound to this sheet
    pub fn sprites(&self) -> &SpriteList {
        &self.sprites
    }
}

impl Disposable for SpriteSheet {
    fn dispose(&self) {
        if !self.disposed.begin() {
            return;
        }
        log::debug!(
            "Disposing sprite sheet \"{}\" ({} sprites bound)",
            self.url,
            self.sprites.len()
        );
        self.sprites.dispose_all();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_set()
    }
}

struct PendingSheet {
    file: Option<SheetFile>,
    image: Option<Rc<DecodedImage>>,
    on_done: Option<OnDone<Rc<SpriteSheet>>>,
}

/// Loads `<base>.json` and `<base>.png` concurrently and merges them.
///
/// The callback fires once, after both halves arrive. The returned token
/// cancels both fetches and disposes any sprites bound to the sheet.
#[derive(Clone)]
pub struct SpriteSheetLoader {
    json: JsonLoader,
    image: ImageLoader,
}

impl SpriteSheetLoader {
    pub fn new(io: Rc<dyn IoBackend>) -> Self {
        Self {
            json: JsonLoader::new(io.clone()),
            image: ImageLoader::new(io),
        }
    }

    fn finish(
        base: &str,
        pending: &RefCell<PendingSheet>,
        sprites: &SpriteList,
    ) -> Result<(), ContentError> {
        let (file, image, on_done) = {
            let mut pending = pending.borrow_mut();
            if pending.file.is_none() || pending.image.is_none() {
                return Ok(());
            }
            (pending.file.take(), pending.image.take(), pending.on_done.take())
        };
        let (Some(file), Some(image), Some(on_done)) = (file, image, on_done) else {
            return Ok(());
        };

        let sheet = SpriteSheet::assemble(base, &file, &image, sprites.clone())?;
        log::debug!(
            "Sprite sheet \"{}\" ready ({} frames, {} animations)",
            base,
            file.frames.len(),
            sheet.animation_count()
        );
        on_done(Rc::new(sheet))
    }
}

impl Loader for SpriteSheetLoader {
    type Output = Rc<SpriteSheet>;

    fn load(&self, base: &str, on_done: OnDone<Rc<SpriteSheet>>) -> CancelToken {
        let pending = Rc::new(RefCell::new(PendingSheet {
            file: None,
            image: None,
            on_done: Some(on_done),
        }));
        let sprites = SpriteList::default();
        let json_url = format!("{}.json", base);
        let png_url = format!("{}.png", base);

        let json_token = {
            let pending = pending.clone();
            let sprites = sprites.clone();
            let base = base.to_string();
            let url = json_url.clone();
            self.json.load(
                &json_url,
                Box::new(move |value| {
                    let file: SheetFile = serde_json::from_value(value).map_err(|e| {
                        ContentError::MalformedSheet {
                            url,
                            reason: e.to_string(),
                        }
                    })?;
                    pending.borrow_mut().file = Some(file);
                    Self::finish(&base, &pending, &sprites)
                }),
            )
        };

        let image_token = {
            let pending = pending.clone();
            let sprites = sprites.clone();
            let base = base.to_string();
            self.image.load(
                &png_url,
                Box::new(move |image| {
                    pending.borrow_mut().image = Some(image);
                    Self::finish(&base, &pending, &sprites)
                }),
            )
        };

        json_token
            .join(image_token)
            .join(CancelToken::new(move || sprites.dispose_all()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::scripted::{png_bytes, ScriptedIo, HERO_JSON};
    use approx::assert_relative_eq;
    use std::cell::Cell;

    struct Probe {
        disposed: DisposeFlag,
        count: Cell<u32>,
    }

    impl Probe {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                disposed: DisposeFlag::new(),
                count: Cell::new(0),
            })
        }
    }

    impl Disposable for Probe {
        fn dispose(&self) {
            if self.disposed.begin() {
                self.count.set(self.count.get() + 1);
            }
        }

        fn is_disposed(&self) -> bool {
            self.disposed.is_set()
        }
    }

    fn start(io: &ScriptedIo) -> (Rc<RefCell<Vec<Rc<SpriteSheet>>>>, CancelToken) {
        let loader = SpriteSheetLoader::new(Rc::new(io.clone()));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let token = loader.load(
            "hero",
            Box::new(move |sheet| {
                sink.borrow_mut().push(sheet);
                Ok(())
            }),
        );
        (seen, token)
    }

    #[test]
    fn test_frame_record_conversion() {
        let record = FrameRecord::from_frame(&[16.0, 4.0, 31.0, 22.0, 24.0, 19.5, 0.15]);

        assert_eq!(record.image_offset, Vec2::new(-16.0, -4.0));
        assert_eq!(record.size, Vec2::new(16.0, 19.0));
        assert_eq!(record.margin, Vec2::new(-8.0, -15.5));
        assert_relative_eq!(record.duration, 0.15);
    }

    #[test]
    fn test_convert_animations_is_deterministic() {
        let file: SheetFile = serde_json::from_str(HERO_JSON).unwrap();

        let first = convert_animations("hero", &file).unwrap();
        let second = convert_animations("hero", &file).unwrap();

        assert_eq!(first, second);
        assert_eq!(first["walk"].len(), 3);
        assert_eq!(first["walk"][0], first["walk"][2]);
        assert_eq!(first["idle"][0].size, Vec2::new(16.0, 24.0));
    }

    #[test]
    fn test_convert_rejects_missing_frame() {
        let file = SheetFile {
            frames: vec![[0.0; 7]],
            animations: BTreeMap::from([("run".to_string(), vec![0, 3])]),
        };

        let err = convert_animations("hero", &file).unwrap_err();
        assert!(matches!(err, ContentError::MalformedSheet { .. }));
        assert!(err.to_string().contains("\"run\""));
    }

    #[test]
    fn test_image_alone_does_not_complete() {
        let io = ScriptedIo::new();
        let (seen, _token) = start(&io);

        assert_eq!(io.requested(), vec!["hero.json", "hero.png"]);
        io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();

        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_completes_once_json_first() {
        let io = ScriptedIo::new();
        let (seen, _token) = start(&io);

        io.respond("hero.json", 200, HERO_JSON).unwrap();
        assert!(seen.borrow().is_empty());
        io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].animation_count(), 2);
        assert_eq!(seen[0].image().width(), 48);
        assert_eq!(seen[0].image().filter, ScaleFilter::Nearest);
    }

    #[test]
    fn test_completes_once_image_first() {
        let io = ScriptedIo::new();
        let (seen, _token) = start(&io);

        io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();
        io.respond("hero.json", 200, HERO_JSON).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url(), "hero");
        assert!(seen[0].animation("idle").is_some());
        assert!(seen[0].animation("jump").is_none());
    }

    #[test]
    fn test_cancel_cancels_both_halves() {
        let io = ScriptedIo::new();
        let (seen, token) = start(&io);

        token.cancel();

        assert_eq!(io.cancelled(), vec!["hero.json", "hero.png"]);
        assert!(!io.respond("hero.json", 200, HERO_JSON).unwrap());
        assert!(!io.respond("hero.png", 200, png_bytes(4, 4)).unwrap());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_cancel_disposes_bound_sprites() {
        let io = ScriptedIo::new();
        let (seen, token) = start(&io);
        io.respond("hero.json", 200, HERO_JSON).unwrap();
        io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();

        let sheet = seen.borrow()[0].clone();
        let probe = Probe::new();
        let bound: Rc<dyn Disposable> = probe.clone();
        sheet.sprites().bind(Rc::downgrade(&bound));
        assert_eq!(sheet.sprites().len(), 1);

        token.cancel();

        assert_eq!(probe.count.get(), 1);
        assert!(sheet.sprites().is_empty());
    }

    #[test]
    fn test_malformed_sheet_json() {
        let io = ScriptedIo::new();
        let (seen, _token) = start(&io);

        let err = io
            .respond("hero.json", 200, r#"{ "frames": "nope" }"#)
            .unwrap_err();

        assert!(matches!(err, ContentError::MalformedSheet { ref url, .. } if url == "hero.json"));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_sheet_dispose_is_idempotent() {
        let image = DecodedImage::decode("hero.png", &png_bytes(2, 2)).unwrap();
        let file: SheetFile = serde_json::from_str(HERO_JSON).unwrap();
        let sheet = SpriteSheet::assemble("hero", &file, &image, SpriteList::default()).unwrap();

        let probe = Probe::new();
        let bound: Rc<dyn Disposable> = probe.clone();
        sheet.sprites().bind(Rc::downgrade(&bound));

        sheet.dispose();
        sheet.dispose();

        assert!(sheet.is_disposed());
        assert_eq!(probe.count.get(), 1);
    }

    #[test]
    fn test_unbind() {
        let list = SpriteList::default();
        let probe = Probe::new();
        let bound: Rc<dyn Disposable> = probe.clone();
        list.bind(Rc::downgrade(&bound));

        assert!(list.unbind(Rc::as_ptr(&bound) as *const ()));
        assert!(!list.unbind(Rc::as_ptr(&bound) as *const ()));
        assert!(list.is_empty());
    }

    #[test]
    fn test_bind_forgets_dropped_objects() {
        let list = SpriteList::default();
        for _ in 0..1000 {
            let bound: Rc<dyn Disposable> = Probe::new();
            list.bind(Rc::downgrade(&bound));
        }
        let probe = Probe::new();
        let bound: Rc<dyn Disposable> = probe.clone();
        list.bind(Rc::downgrade(&bound));

        assert_eq!(list.entries.borrow().len(), 1);
        assert_eq!(list.len(), 1);

        list.dispose_all();
        assert_eq!(probe.count.get(), 1);
    }
}
