//! Named, ref-counted wall-clock timers.
//!
//! A timer accrues time while its running count is above zero; nested
//! starts increment the count without restarting the clock, so reentrant
//! code measures one contiguous window instead of overlapping ones.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Timer {
    name: String,
    running: u16,
    total: Duration,
    started: Option<Instant>,
    runs: u32,
}

impl Timer {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: 0,
            total: Duration::ZERO,
            started: None,
            runs: 0,
        }
    }

    fn start(&mut self) -> u32 {
        self.running += 1;
        self.runs += 1;
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.runs
    }

    fn stop(&mut self) {
        if self.running == 0 {
            return;
        }
        self.running -= 1;
        if self.running > 0 {
            return;
        }
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
        }
    }

    /// Total including the still-open window, without mutating state.
    fn snapshot(&self) -> Duration {
        match self.started {
            Some(started) => self.total + started.elapsed(),
            None => self.total,
        }
    }
}

/// Snapshot of one timer, as reported by [`Timers::results`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerResult {
    pub name: String,
    pub total: Duration,
    pub runs: u32,
}

/// Registry of timers for one trace session, keyed by name.
#[derive(Debug, Default)]
pub struct Timers {
    inner: Mutex<Vec<Timer>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or nest into) the named timer. Returns the invocation
    /// ordinal, 1 for the first start.
    pub fn start(&self, name: &str) -> u32 {
        let mut timers = self.inner.lock();
        if let Some(timer) = timers.iter_mut().find(|t| t.name == name) {
            return timer.start();
        }
        let mut timer = Timer::new(name);
        let run = timer.start();
        timers.push(timer);
        run
    }

    /// Unwind one start of the named timer. Unknown names and already
    /// idle timers are ignored.
    pub fn stop(&self, name: &str) {
        let mut timers = self.inner.lock();
        if let Some(timer) = timers.iter_mut().find(|t| t.name == name) {
            timer.stop();
        }
    }

    /// Read-only snapshot of every timer in creation order. Running
    /// timers report their elapsed time up to now and keep running.
    pub fn results(&self) -> Vec<TimerResult> {
        let timers = self.inner.lock();
        timers
            .iter()
            .map(|timer| TimerResult {
                name: timer.name.clone(),
                total: timer.snapshot(),
                runs: timer.runs,
            })
            .collect()
    }
}
