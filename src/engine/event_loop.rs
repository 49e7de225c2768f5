/// Cooperative event loop
///
/// Every callback in the runtime runs on the thread that owns the loop. One
/// turn runs deferred tasks, delivers finished fetches and fires due timers.
/// Errors escaping a callback go to the supervisor, which halts the loop.
use anyhow::Result;
use log::{debug, info};
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::io::{IoBackend, ThreadedIo};
use super::supervisor::Supervisor;
use super::timer::{Scheduler, SystemClock};
use crate::config::RuntimeConfig;

/// Longest single block while waiting for I/O, so timers stay responsive
const MAX_WAIT: Duration = Duration::from_millis(10);

/// Why [`EventLoop::run_until`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The condition became true
    Done,
    /// A failure halted the loop
    Halted,
    /// Nothing is in flight or scheduled, so the condition can never change
    Idle,
    /// The time limit passed first
    TimedOut,
}

pub struct EventLoop {
    io: ThreadedIo,
    scheduler: Scheduler,
    supervisor: Supervisor,

    /// Turns run so far
    turn_count: u64,

    /// Callbacks run so far
    callback_count: u64,
}

impl EventLoop {
    /// Create a loop with a worker pool and the wall clock
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Self::with_scheduler(config, Scheduler::new(SystemClock::new()))
    }

    /// Create a loop driving an existing scheduler
    pub fn with_scheduler(config: &RuntimeConfig, scheduler: Scheduler) -> Result<Self> {
        let io = ThreadedIo::new(config)?;
        info!(
            "Event loop ready ({} I/O workers, assets in {})",
            config.worker_threads.max(1),
            config.asset_root.display()
        );
        Ok(Self {
            io,
            scheduler,
            supervisor: Supervisor::new(),
            turn_count: 0,
            callback_count: 0,
        })
    }

    /// Replace the supervisor (e.g. to install a notify hook)
    pub fn set_supervisor(&mut self, supervisor: Supervisor) {
        self.supervisor = supervisor;
    }

    /// I/O handle for loaders and content managers
    pub fn io(&self) -> Rc<dyn IoBackend> {
        Rc::new(self.io.clone())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn is_halted(&self) -> bool {
        self.supervisor.is_halted()
    }

    /// Run one non-blocking turn; returns the number of callbacks run
    pub fn turn(&mut self) -> usize {
        if self.is_halted() {
            return 0;
        }
        self.turn_count += 1;

        let delivered = self.supervisor.guard(self.io.pump()).unwrap_or(0);
        let fired = if self.is_halted() {
            0
        } else {
            self.scheduler.run_due()
        };

        let ran = delivered + fired;
        self.callback_count += ran as u64;
        ran
    }

    /// Turn the loop until `done` returns true, blocking briefly between
    /// turns while work is outstanding
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool, limit: Duration) -> RunOutcome {
        let started = Instant::now();
        loop {
            self.turn();
            if done() {
                return RunOutcome::Done;
            }
            if self.is_halted() {
                return RunOutcome::Halted;
            }
            if self.io.is_idle() && self.scheduler.pending() == 0 {
                debug!("Event loop idle after {} turns", self.turn_count);
                return RunOutcome::Idle;
            }
            if started.elapsed() >= limit {
                return RunOutcome::TimedOut;
            }

            let wait = self
                .scheduler
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(self.scheduler.now()))
                .unwrap_or(MAX_WAIT)
                .min(MAX_WAIT);
            if self.io.in_flight() > 0 {
                let delivered = self.supervisor.guard(self.io.wait(wait)).unwrap_or(0);
                self.callback_count += delivered as u64;
            } else if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    /// Get total number of turns run
    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    /// Get total number of callbacks run
    pub fn callback_count(&self) -> u64 {
        self.callback_count
    }
}
