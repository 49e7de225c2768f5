/// Timers and animation clocks
///
/// The scheduler is a deadline-ordered queue of one-shot tasks over a
/// pluggable clock. It is polled by the event loop; nothing runs on its own.
/// `AnimationClock` is a pausable countdown built on top of it.
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Source of the current time, measured from an arbitrary origin
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock, starting at zero when created
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Identifies a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

type Task = Box<dyn FnOnce()>;

struct SchedulerInner {
    clock: Box<dyn Clock>,
    // Keyed by (deadline, id) so ties run in scheduling order
    timers: RefCell<BTreeMap<(Duration, u64), Task>>,
    next_id: Cell<u64>,
}

/// One-shot timer queue. Clones share the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                clock: Box::new(clock),
                timers: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Current time of the underlying clock
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Run `task` once the clock reaches `at`
    pub fn schedule_at(&self, at: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .timers
            .borrow_mut()
            .insert((at, id), Box::new(task));
        TimerId(id)
    }

    /// Run `task` after `delay` from now
    pub fn schedule_in(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        self.schedule_at(self.now() + delay, task)
    }

    /// Remove a task that has not run yet. Returns false if it already ran.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut timers = self.inner.timers.borrow_mut();
        let key = timers.keys().find(|(_, timer)| *timer == id.0).copied();
        match key {
            Some(key) => timers.remove(&key).is_some(),
            None => false,
        }
    }

    /// Run every task whose deadline has passed, in deadline order.
    ///
    /// Tasks scheduled by a running task run in the same call if they are
    /// already due.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.now();
            let task = {
                let mut timers = self.inner.timers.borrow_mut();
                let due = timers
                    .first_key_value()
                    .is_some_and(|(&(deadline, _), _)| deadline <= now);
                if due {
                    timers.pop_first().map(|(_, task)| task)
                } else {
                    None
                }
            };
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Deadline of the earliest pending task
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner
            .timers
            .borrow()
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.inner.timers.borrow().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SystemClock::new())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Lifecycle of an [`AnimationClock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
    Paused,
    Completed,
}

/// Notifications raised by an [`AnimationClock`]
#[derive(Default)]
pub struct ClockHooks {
    pub on_resumed: Option<Rc<dyn Fn()>>,
    pub on_paused: Option<Rc<dyn Fn()>>,
    pub on_completed: Option<Box<dyn FnOnce()>>,
}

impl ClockHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resumed(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_resumed = Some(Rc::new(hook));
        self
    }

    pub fn on_paused(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_paused = Some(Rc::new(hook));
        self
    }

    pub fn on_completed(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_completed = Some(Box::new(hook));
        self
    }
}

struct ClockInner {
    duration: Duration,
    state: ClockState,
    /// Time accumulated before the current run
    banked: Duration,
    /// When the current run started
    resumed_at: Duration,
    expiry: Option<TimerId>,
    hooks: ClockHooks,
}

/// A countdown that can be paused and resumed.
///
/// Starts idle. Completion fires once, from the scheduler, when the running
/// time adds up to the duration. Dropping the clock cancels its expiry.
pub struct AnimationClock {
    inner: Rc<RefCell<ClockInner>>,
    scheduler: Scheduler,
}

impl AnimationClock {
    pub fn new(scheduler: &Scheduler, duration: Duration, hooks: ClockHooks) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ClockInner {
                duration,
                state: ClockState::Idle,
                banked: Duration::ZERO,
                resumed_at: Duration::ZERO,
                expiry: None,
                hooks,
            })),
            scheduler: scheduler.clone(),
        }
    }

    /// Start or continue counting down. No-op unless idle or paused.
    pub fn resume(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, ClockState::Idle | ClockState::Paused) {
                return;
            }
            let now = self.scheduler.now();
            let remaining = inner.duration.saturating_sub(inner.banked);
            inner.state = ClockState::Running;
            inner.resumed_at = now;

            let weak = Rc::downgrade(&self.inner);
            inner.expiry = Some(
                self.scheduler
                    .schedule_at(now + remaining, move || expire(&weak)),
            );
            inner.hooks.on_resumed.clone()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Stop counting down. No-op unless running.
    pub fn pause(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ClockState::Running {
                return;
            }
            let run = self.scheduler.now().saturating_sub(inner.resumed_at);
            inner.banked = (inner.banked + run).min(inner.duration);
            inner.state = ClockState::Paused;
            if let Some(expiry) = inner.expiry.take() {
                self.scheduler.cancel(expiry);
            }
            inner.hooks.on_paused.clone()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Running time so far, capped at the duration
    pub fn elapsed(&self) -> Duration {
        let inner = self.inner.borrow();
        let elapsed = match inner.state {
            ClockState::Running => {
                inner.banked + self.scheduler.now().saturating_sub(inner.resumed_at)
            }
            ClockState::Completed => inner.duration,
            ClockState::Idle | ClockState::Paused => inner.banked,
        };
        elapsed.min(inner.duration)
    }

    /// Fraction of the duration that has elapsed, in `0.0..=1.0`
    pub fn progress(&self) -> f32 {
        let duration = self.duration();
        if duration.is_zero() {
            return 1.0;
        }
        self.elapsed().as_secs_f32() / duration.as_secs_f32()
    }

    pub fn duration(&self) -> Duration {
        self.inner.borrow().duration
    }

    pub fn state(&self) -> ClockState {
        self.inner.borrow().state
    }

    /// Stop the clock for good without completing it
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(expiry) = inner.expiry.take() {
            self.scheduler.cancel(expiry);
        }
        inner.hooks.on_completed = None;
    }
}

impl Drop for AnimationClock {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            if let Some(expiry) = inner.expiry.take() {
                self.scheduler.cancel(expiry);
            }
        }
    }
}

impl fmt::Debug for AnimationClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationClock")
            .field("state", &self.state())
            .field("elapsed", &self.elapsed())
            .field("duration", &self.duration())
            .finish()
    }
}

fn expire(weak: &Weak<RefCell<ClockInner>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let hook = {
        let mut inner = inner.borrow_mut();
        if inner.state != ClockState::Running {
            return;
        }
        inner.state = ClockState::Completed;
        inner.banked = inner.duration;
        inner.expiry = None;
        inner.hooks.on_completed.take()
    };
    if let Some(hook) = hook {
        hook();
    }
}
