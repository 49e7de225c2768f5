// Content manager: joins many loads into one completion event

use log::{debug, info};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::handle::{Content, ContentKind, ContentType};
use super::loader::{DecodedImage, ImageLoader, JsonLoader, Loader, TextLoader};
use super::sprite_sheet::{SpriteSheet, SpriteSheetLoader};
use super::ContentError;
use crate::core::{CancelToken, Disposable, Registry};
use crate::engine::io::IoBackend;

thread_local! {
    // Live managers, swept by the supervisor on unrecoverable errors
    static MANAGERS: Registry<RefCell<ManagerState>> = const { Registry::new() };
}

/// Dispose every live content manager on this thread.
///
/// Returns how many were disposed.
pub fn dispose_all_managers() -> usize {
    let live = MANAGERS
        .try_with(|registry| registry.live())
        .unwrap_or_default();
    let count = live.len();
    for state in live {
        dispose_state(&state);
    }
    count
}

/// Number of live, undisposed content managers on this thread
pub fn live_manager_count() -> usize {
    MANAGERS.try_with(|registry| registry.len()).unwrap_or(0)
}

/// Lifecycle of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Loaded,
    Disposed,
}

/// Snapshot of a request, as returned by [`ContentManager::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub url: String,
    pub kind: ContentKind,
    pub state: RequestState,
}

type ProgressHook = Rc<dyn Fn(usize, usize)>;
type LoadedHook = Rc<dyn Fn()>;

/// Notifications raised while content loads
#[derive(Clone, Default)]
pub struct ManagerHooks {
    progress: Option<ProgressHook>,
    loaded: Option<LoadedHook>,
}

impl ManagerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every completion with `(completed, total)`
    pub fn on_progress(mut self, hook: impl Fn(usize, usize) + 'static) -> Self {
        self.progress = Some(Rc::new(hook));
        self
    }

    /// Called once, when every request has completed
    pub fn on_loaded(mut self, hook: impl Fn() + 'static) -> Self {
        self.loaded = Some(Rc::new(hook));
        self
    }
}

struct ContentRequest {
    url: String,
    kind: ContentKind,
    state: RequestState,
    value: Option<Content>,
    cancel: CancelToken,
}

impl ContentRequest {
    fn info(&self) -> RequestInfo {
        RequestInfo {
            url: self.url.clone(),
            kind: self.kind,
            state: self.state,
        }
    }
}

struct ManagerState {
    requests: Vec<ContentRequest>,
    completed: usize,
    disposed: bool,
    loaded_fired: bool,
    hooks: ManagerHooks,
}

impl ManagerState {
    fn find(&self, url: &str) -> Option<&ContentRequest> {
        self.requests.iter().find(|request| request.url == url)
    }

    fn total(&self) -> usize {
        self.requests.len()
    }

    // Fire the loaded hook at most once; returns it for calling outside the borrow
    fn take_loaded_hook(&mut self) -> Option<LoadedHook> {
        if self.loaded_fired || self.completed != self.total() {
            return None;
        }
        self.loaded_fired = true;
        self.hooks.loaded.clone()
    }
}

/// Aggregates a set of content requests into one completion event.
///
/// Requests start loading as soon as they are added. Once the first request
/// completes the set is sealed. Values can be retrieved only after every
/// request has completed. Dropping the manager disposes it.
pub struct ContentManager {
    state: Rc<RefCell<ManagerState>>,
    io: Rc<dyn IoBackend>,
}

impl ContentManager {
    /// Create an empty manager.
    ///
    /// If nothing has been added by the next pump of the event loop, the
    /// manager counts as fully loaded and the loaded hook fires then.
    pub fn new(io: Rc<dyn IoBackend>, hooks: ManagerHooks) -> Self {
        let state = Rc::new(RefCell::new(ManagerState {
            requests: Vec::new(),
            completed: 0,
            disposed: false,
            loaded_fired: false,
            hooks,
        }));
        MANAGERS.with(|registry| registry.register(&state));

        let weak = Rc::downgrade(&state);
        io.defer(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                check_empty(&state);
            }
            Ok(())
        }));

        Self { state, io }
    }

    /// Register a request and start loading it.
    ///
    /// Adding the same URL with the same kind again is a no-op.
    pub fn add(&self, kind: ContentKind, url: &str) -> Result<(), ContentError> {
        let index = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return Err(ContentError::Disposed);
            }
            if state.completed > 0 || state.loaded_fired {
                return Err(ContentError::Sealed);
            }
            if let Some(existing) = state.find(url) {
                if existing.kind != kind {
                    return Err(ContentError::KindConflict {
                        url: url.to_string(),
                        first: existing.kind,
                        second: kind,
                    });
                }
                debug!("\"{}\" already requested as {}", url, kind);
                return Ok(());
            }

            state.requests.push(ContentRequest {
                url: url.to_string(),
                kind,
                state: RequestState::Pending,
                value: None,
                cancel: CancelToken::noop(),
            });
            state.requests.len() - 1
        };

        debug!("Requesting \"{}\" as {}", url, kind);
        let token = self.start(kind, url, index);
        self.state.borrow_mut().requests[index].cancel = token;
        Ok(())
    }

    fn start(&self, kind: ContentKind, url: &str, index: usize) -> CancelToken {
        let weak = Rc::downgrade(&self.state);
        match kind {
            ContentKind::Text => TextLoader::new(self.io.clone()).load(
                url,
                Box::new(move |text: String| {
                    complete(&weak, index, Content::Text(Rc::from(text)))
                }),
            ),
            ContentKind::Json => JsonLoader::new(self.io.clone()).load(
                url,
                Box::new(move |value: serde_json::Value| {
                    complete(&weak, index, Content::Json(Rc::new(value)))
                }),
            ),
            ContentKind::Image => ImageLoader::new(self.io.clone()).load(
                url,
                Box::new(move |image: Rc<DecodedImage>| {
                    complete(&weak, index, Content::Image(image))
                }),
            ),
            ContentKind::SpriteSheet => SpriteSheetLoader::new(self.io.clone()).load(
                url,
                Box::new(move |sheet: Rc<SpriteSheet>| {
                    complete(&weak, index, Content::SpriteSheet(sheet))
                }),
            ),
        }
    }

    /// Look up the request for a URL
    pub fn find(&self, url: &str) -> Result<Option<RequestInfo>, ContentError> {
        let state = self.state.borrow();
        if state.disposed {
            return Err(ContentError::Disposed);
        }
        Ok(state.find(url).map(ContentRequest::info))
    }

    /// Retrieve a loaded value; the manager must be fully loaded
    pub fn get(&self, kind: ContentKind, url: &str) -> Result<Content, ContentError> {
        let state = self.state.borrow();
        if state.disposed {
            return Err(ContentError::Disposed);
        }
        if state.completed != state.total() {
            return Err(ContentError::NotReady);
        }
        let request = state
            .find(url)
            .ok_or_else(|| ContentError::NotFound(url.to_string()))?;
        if request.kind != kind {
            return Err(ContentError::KindMismatch {
                url: url.to_string(),
                loaded: request.kind,
                requested: kind,
            });
        }
        request
            .value
            .clone()
            .ok_or_else(|| ContentError::NotFound(url.to_string()))
    }

    /// Typed retrieval, e.g. `get_as::<SpriteSheetContent>("hero")`
    pub fn get_as<T: ContentType>(&self, url: &str) -> Result<T::Value, ContentError> {
        let content = self.get(T::KIND, url)?;
        let loaded = content.kind();
        T::extract(content).ok_or_else(|| ContentError::KindMismatch {
            url: url.to_string(),
            loaded,
            requested: T::KIND,
        })
    }

    /// Retrieve a loaded sprite sheet
    pub fn sprite_sheet(&self, url: &str) -> Result<Rc<SpriteSheet>, ContentError> {
        self.get_as::<super::SpriteSheetContent>(url)
    }

    /// `(completed, total)`
    pub fn progress(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.completed, state.total())
    }

    /// Check whether every request has completed
    pub fn is_loaded(&self) -> bool {
        let state = self.state.borrow();
        !state.disposed && state.completed == state.total()
    }
}

impl Disposable for ContentManager {
    /// Cancel pending loads and dispose loaded values. Idempotent.
    fn dispose(&self) {
        dispose_state(&self.state);
    }

    fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }
}

impl Drop for ContentManager {
    fn drop(&mut self) {
        dispose_state(&self.state);
    }
}

impl fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ContentManager")
            .field("completed", &state.completed)
            .field("total", &state.total())
            .field("disposed", &state.disposed)
            .finish()
    }
}

fn check_empty(state_rc: &Rc<RefCell<ManagerState>>) {
    let hook = {
        let mut state = state_rc.borrow_mut();
        if state.disposed || state.total() > 0 {
            return;
        }
        state.take_loaded_hook()
    };
    info!("Content manager has nothing to load");
    if let Some(hook) = hook {
        hook();
    }
}

fn complete(
    weak: &Weak<RefCell<ManagerState>>,
    index: usize,
    content: Content,
) -> Result<(), ContentError> {
    let Some(state_rc) = weak.upgrade() else {
        // The manager is gone; nobody will ever release this value
        content.dispose();
        return Ok(());
    };

    let (progress, loaded, completed, total, url) = {
        let mut state = state_rc.borrow_mut();
        state.completed += 1;
        let disposed = state.disposed;
        let request = &mut state.requests[index];

        if disposed {
            request.state = RequestState::Disposed;
            let url = request.url.clone();
            drop(state);
            debug!("\"{}\" finished after disposal; disposing it", url);
            content.dispose();
            return Ok(());
        }

        request.state = RequestState::Loaded;
        request.value = Some(content);
        let url = request.url.clone();

        let loaded = state.take_loaded_hook();
        (
            state.hooks.progress.clone(),
            loaded,
            state.completed,
            state.total(),
            url,
        )
    };

    debug!("Loaded \"{}\" ({}/{})", url, completed, total);
    if let Some(progress) = progress {
        progress(completed, total);
    }
    if let Some(loaded) = loaded {
        info!("All {} content requests loaded", total);
        loaded();
    }
    Ok(())
}

fn dispose_state(state_rc: &Rc<RefCell<ManagerState>>) {
    let released = {
        let mut state = match state_rc.try_borrow_mut() {
            Ok(state) => state,
            Err(_) => {
                log::warn!("Content manager disposed while busy; skipping");
                return;
            }
        };
        if state.disposed {
            return;
        }
        state.disposed = true;

        state
            .requests
            .iter_mut()
            .rev()
            .map(|request| {
                request.state = RequestState::Disposed;
                (request.cancel.clone(), request.value.take())
            })
            .collect::<Vec<_>>()
    };

    // The registry may already be gone during thread teardown
    let _ = MANAGERS.try_with(|registry| registry.deregister(state_rc));

    let count = released.len();
    for (cancel, value) in released {
        cancel.cancel();
        if let Some(value) = value {
            value.dispose();
        }
    }
    info!("Content manager disposed ({} requests released)", count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assets::{JsonContent, SpriteSheetContent, TextContent};
    use crate::engine::io::scripted::{png_bytes, ScriptedIo, HERO_JSON};
    use std::cell::Cell;

    struct Fixture {
        io: ScriptedIo,
        manager: ContentManager,
        progress: Rc<RefCell<Vec<(usize, usize)>>>,
        loaded: Rc<Cell<u32>>,
    }

    fn fixture() -> Fixture {
        let io = ScriptedIo::new();
        let progress = Rc::new(RefCell::new(Vec::new()));
        let loaded = Rc::new(Cell::new(0));
        let hooks = {
            let progress = progress.clone();
            let loaded = loaded.clone();
            ManagerHooks::new()
                .on_progress(move |done, total| progress.borrow_mut().push((done, total)))
                .on_loaded(move || loaded.set(loaded.get() + 1))
        };
        let manager = ContentManager::new(Rc::new(io.clone()), hooks);
        Fixture {
            io,
            manager,
            progress,
            loaded,
        }
    }

    #[test]
    fn test_total_counts_distinct_requests() {
        let f = fixture();
        f.manager.add(ContentKind::Json, "a").unwrap();
        f.manager.add(ContentKind::Image, "b").unwrap();
        f.manager.add(ContentKind::Json, "a").unwrap();
        f.manager.add(ContentKind::Text, "c").unwrap();

        assert_eq!(f.manager.progress(), (0, 3));
    }

    #[test]
    fn test_duplicate_add_starts_one_load() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.manager.add(ContentKind::Text, "a").unwrap();

        assert_eq!(f.io.requested(), vec!["a"]);
        assert_eq!(f.manager.progress(), (0, 1));
    }

    #[test]
    fn test_add_starts_loading_immediately() {
        let f = fixture();
        f.manager.add(ContentKind::SpriteSheet, "hero").unwrap();
        assert_eq!(f.io.requested(), vec!["hero.json", "hero.png"]);
    }

    #[test]
    fn test_conflicting_kinds_fail_in_either_order() {
        let f = fixture();
        f.manager.add(ContentKind::Json, "x").unwrap();
        let err = f.manager.add(ContentKind::Image, "x").unwrap_err();
        assert!(matches!(
            err,
            ContentError::KindConflict {
                first: ContentKind::Json,
                second: ContentKind::Image,
                ..
            }
        ));

        let g = fixture();
        g.manager.add(ContentKind::Image, "x").unwrap();
        let err = g.manager.add(ContentKind::Json, "x").unwrap_err();
        assert!(matches!(
            err,
            ContentError::KindConflict {
                first: ContentKind::Image,
                second: ContentKind::Json,
                ..
            }
        ));
        assert_eq!(g.manager.progress(), (0, 1));
    }

    #[test]
    fn test_get_before_loaded_is_not_ready() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.manager.add(ContentKind::Text, "b").unwrap();
        f.io.respond("a", 200, "alpha").unwrap();

        assert!(matches!(
            f.manager.get(ContentKind::Text, "a"),
            Err(ContentError::NotReady)
        ));
    }

    #[test]
    fn test_get_after_loaded() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.manager.add(ContentKind::Json, "b").unwrap();
        f.io.respond("a", 200, "alpha").unwrap();
        f.io.respond("b", 200, "[1, 2]").unwrap();

        assert!(f.manager.is_loaded());
        assert_eq!(&*f.manager.get_as::<TextContent>("a").unwrap(), "alpha");
        assert_eq!(f.manager.get_as::<JsonContent>("b").unwrap()[1], 2);

        assert!(matches!(
            f.manager.get(ContentKind::Image, "a"),
            Err(ContentError::KindMismatch {
                loaded: ContentKind::Text,
                requested: ContentKind::Image,
                ..
            })
        ));
        assert!(matches!(
            f.manager.get(ContentKind::Text, "zzz"),
            Err(ContentError::NotFound(_))
        ));
    }

    #[test]
    fn test_progress_follows_completion_order() {
        let f = fixture();
        f.manager.add(ContentKind::Json, "a").unwrap();
        f.manager.add(ContentKind::Image, "b").unwrap();

        f.io.respond("b", 200, png_bytes(2, 2)).unwrap();
        assert_eq!(f.loaded.get(), 0);
        f.io.respond("a", 200, "{}").unwrap();

        assert_eq!(*f.progress.borrow(), vec![(1, 2), (2, 2)]);
        assert_eq!(f.loaded.get(), 1);
    }

    #[test]
    fn test_add_after_first_completion_is_sealed() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.manager.add(ContentKind::Text, "b").unwrap();
        f.io.respond("a", 200, "alpha").unwrap();

        assert!(matches!(
            f.manager.add(ContentKind::Text, "c"),
            Err(ContentError::Sealed)
        ));
    }

    #[test]
    fn test_empty_manager_fires_loaded_on_next_pump() {
        let f = fixture();
        assert_eq!(f.loaded.get(), 0);

        f.io.run_deferred().unwrap();

        assert_eq!(f.loaded.get(), 1);
        assert!(f.manager.is_loaded());
        assert!(f.progress.borrow().is_empty());
        assert!(matches!(
            f.manager.add(ContentKind::Text, "late"),
            Err(ContentError::Sealed)
        ));
    }

    #[test]
    fn test_non_empty_manager_ignores_empty_check() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.io.run_deferred().unwrap();

        assert_eq!(f.loaded.get(), 0);
    }

    #[test]
    fn test_dispose_before_completion_cancels_everything() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        f.manager.add(ContentKind::SpriteSheet, "hero").unwrap();

        f.manager.dispose();

        let mut cancelled = f.io.cancelled();
        cancelled.sort();
        assert_eq!(cancelled, vec!["a", "hero.json", "hero.png"]);
        assert!(!f.io.respond("a", 200, "alpha").unwrap());
        assert_eq!(f.manager.progress().0, 0);
        assert!(matches!(f.manager.find("a"), Err(ContentError::Disposed)));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let f = fixture();
        f.manager.add(ContentKind::Text, "a").unwrap();
        let before = live_manager_count();

        f.manager.dispose();
        f.manager.dispose();

        assert!(f.manager.is_disposed());
        assert_eq!(f.io.cancelled(), vec!["a"]);
        assert_eq!(live_manager_count(), before - 1);
    }

    #[test]
    fn test_dispose_after_load_disposes_sheets() {
        let f = fixture();
        f.manager.add(ContentKind::SpriteSheet, "hero").unwrap();
        f.io.respond("hero.json", 200, HERO_JSON).unwrap();
        f.io.respond("hero.png", 200, png_bytes(48, 24)).unwrap();

        let sheet = f.manager.get_as::<SpriteSheetContent>("hero").unwrap();
        assert!(!sheet.is_disposed());

        f.manager.dispose();

        assert!(sheet.is_disposed());
        assert!(f.io.cancelled().is_empty());
    }

    #[test]
    fn test_late_completion_is_disposed_not_stored() {
        let f = fixture();
        f.io.set_deliver_cancelled(true);
        f.manager.add(ContentKind::Image, "icon").unwrap();
        f.manager.add(ContentKind::SpriteSheet, "hero").unwrap();
        f.io.respond("hero.json", 200, HERO_JSON).unwrap();

        f.manager.dispose();

        // The decode could not be stopped and finishes anyway
        assert!(f.io.respond("hero.png", 200, png_bytes(48, 24)).unwrap());
        assert!(f.progress.borrow().is_empty());
        assert_eq!(f.loaded.get(), 0);
        assert!(matches!(
            f.manager.get(ContentKind::SpriteSheet, "hero"),
            Err(ContentError::Disposed)
        ));
    }

    #[test]
    fn test_drop_disposes_and_deregisters() {
        let io = ScriptedIo::new();
        let before = live_manager_count();
        {
            let manager = ContentManager::new(Rc::new(io.clone()), ManagerHooks::new());
            manager.add(ContentKind::Text, "a").unwrap();
            assert_eq!(live_manager_count(), before + 1);
        }
        assert_eq!(live_manager_count(), before);
        assert_eq!(io.cancelled(), vec!["a"]);
    }

    #[test]
    fn test_dispose_all_managers() {
        let first = fixture();
        let second = fixture();
        first.manager.add(ContentKind::Text, "a").unwrap();
        second.manager.add(ContentKind::Text, "b").unwrap();

        let disposed = dispose_all_managers();

        assert!(disposed >= 2);
        assert!(first.manager.is_disposed());
        assert!(second.manager.is_disposed());
        assert_eq!(live_manager_count(), 0);
    }

    #[test]
    fn test_find() {
        let f = fixture();
        f.manager.add(ContentKind::Json, "a").unwrap();

        let info = f.manager.find("a").unwrap().unwrap();
        assert_eq!(info.kind, ContentKind::Json);
        assert_eq!(info.state, RequestState::Pending);
        assert!(f.manager.find("b").unwrap().is_none());

        f.io.respond("a", 200, "1").unwrap();
        assert_eq!(
            f.manager.find("a").unwrap().unwrap().state,
            RequestState::Loaded
        );
    }
}
