//! Window clock: owns the current window identity and boundaries.
//!
//! Rollover is the only mutation that changes the window id. The rollover
//! hook runs synchronously while the transition is held so that draining the
//! reservoir is atomic with the window change; no span is ever charged to
//! the wrong window.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use parking_lot::{Mutex, RwLock};

/// Observed state of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Monotonically increasing window id, starting at 1.
    pub id: u64,
    pub start: SystemTime,
    pub end: SystemTime,
    /// Arrivals charged to this window so far.
    pub seen: u64,
}

type RolloverHook = Box<dyn Fn(&WindowSnapshot) + Send + Sync>;

struct WindowState {
    id: u64,
    start: SystemTime,
    end: SystemTime,
}

/// Clock driving the windowed sampling lifecycle.
pub struct WindowClock {
    duration: Duration,
    state: Mutex<WindowState>,
    seen: AtomicU64,
    hook: RwLock<Option<RolloverHook>>,
}

impl WindowClock {
    /// Fresh clock: window 1 starts now.
    pub fn new(duration: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            duration,
            state: Mutex::new(WindowState {
                id: 1,
                start: now,
                end: now + duration,
            }),
            seen: AtomicU64::new(0),
            hook: RwLock::new(None),
        }
    }

    /// Register the rollover hook. Called at most once, before ingestion
    /// starts; the hook observes the closed window's final snapshot.
    pub fn on_rollover(&self, hook: impl Fn(&WindowSnapshot) + Send + Sync + 'static) {
        *self.hook.write() = Some(Box::new(hook));
    }

    /// Current window identity, boundaries, and arrival count.
    pub fn current(&self) -> WindowSnapshot {
        let st = self.state.lock();
        WindowSnapshot {
            id: st.id,
            start: st.start,
            end: st.end,
            seen: self.seen.load(Ordering::SeqCst),
        }
    }

    /// Assign the next 1-based arrival index within the current window.
    /// Lock-free; safe to call from any ingestion thread.
    pub fn increment_seen(&self) -> u64 {
        self.seen.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Advance to a new window if the current one has ended. Idempotent under
    /// concurrency: exactly one caller performs the transition and runs the
    /// rollover hook; the rest observe the new window. Returns whether this
    /// call performed the transition.
    pub fn check_rollover(&self) -> bool {
        let now = SystemTime::now();
        let mut st = self.state.lock();
        if now < st.end {
            return false;
        }
        self.rollover_locked(&mut st, now);
        true
    }

    /// Unconditionally close the current window and start the next one,
    /// running the rollover hook. Used by orderly drains and tests.
    pub fn force_rollover(&self) {
        let now = SystemTime::now();
        let mut st = self.state.lock();
        self.rollover_locked(&mut st, now);
    }

    fn rollover_locked(&self, st: &mut WindowState, now: SystemTime) {
        let closed = WindowSnapshot {
            id: st.id,
            start: st.start,
            end: st.end,
            seen: self.seen.swap(0, Ordering::SeqCst),
        };
        st.id += 1;
        st.start = now;
        st.end = now + self.duration;
        if let Some(hook) = self.hook.read().as_ref() {
            hook(&closed);
        }
    }

    /// Adopt a recovered window verbatim. Only used during checkpoint
    /// recovery, before ingestion starts.
    pub fn force_state(&self, id: u64, start: SystemTime, end: SystemTime, seen: u64) {
        let mut st = self.state.lock();
        st.id = id;
        st.start = start;
        st.end = end;
        self.seen.store(seen, Ordering::SeqCst);
    }
}
