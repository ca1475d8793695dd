//! Per-room countdown state machine.
//!
//! The countdown itself is a spawned task that only signals "one second elapsed"; every
//! decrement happens on the engine through [`RoomTimer::tick`], which discards signals from a
//! superseded countdown by comparing generations.

use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

/// Cadence of countdown ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Observable state of a room timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No countdown configured.
    Idle,
    /// Counting down towards `ends_at`.
    Running {
        /// Wall-clock instant at which the countdown reaches zero.
        ends_at: SystemTime,
        /// Seconds left.
        remaining: u32,
    },
    /// Countdown stopped, either explicitly or because it expired.
    Paused {
        /// Seconds left when the countdown stopped.
        remaining: u32,
    },
}

/// What a live tick did to the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One second elapsed; `remaining` seconds left.
    Tick(u32),
    /// The countdown reached zero and stopped.
    Expired,
}

/// Timer owned by a room aggregate.
#[derive(Debug)]
pub struct RoomTimer {
    state: TimerState,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Default for RoomTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomTimer {
    /// Idle timer without any countdown.
    pub fn new() -> Self {
        Self {
            state: TimerState::Idle,
            generation: 0,
            handle: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Generation of the live countdown. Ticks carrying another value are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a fresh countdown of `duration_secs`, superseding any existing one.
    ///
    /// `spawn` receives the new generation and returns the handle of the ticking task.
    pub fn start<F>(&mut self, duration_secs: u32, spawn: F) -> SystemTime
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.cancel();
        let ends_at = SystemTime::now() + Duration::from_secs(u64::from(duration_secs));
        self.state = TimerState::Running {
            ends_at,
            remaining: duration_secs,
        };
        self.handle = Some(spawn(self.generation));
        ends_at
    }

    /// Stop the countdown keeping the remaining seconds. `None` when no timer exists.
    pub fn pause(&mut self) -> Option<u32> {
        let remaining = match self.state {
            TimerState::Idle => return None,
            TimerState::Running { remaining, .. } | TimerState::Paused { remaining } => remaining,
        };
        self.cancel();
        self.state = TimerState::Paused { remaining };
        Some(remaining)
    }

    /// Stop the countdown and forget the timer entirely.
    pub fn reset(&mut self) {
        self.cancel();
        self.state = TimerState::Idle;
    }

    /// Apply one elapsed second if `generation` belongs to the live countdown.
    pub fn tick(&mut self, generation: u64) -> Option<TickOutcome> {
        if generation != self.generation {
            return None;
        }
        let TimerState::Running { ends_at, remaining } = self.state else {
            return None;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.cancel();
            self.state = TimerState::Paused { remaining: 0 };
            return Some(TickOutcome::Expired);
        }

        self.state = TimerState::Running { ends_at, remaining };
        Some(TickOutcome::Tick(remaining))
    }

    /// Abort the ticking task and invalidate every tick it may already have queued.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Drop for RoomTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Spawn a task invoking `on_tick` every [`TICK_INTERVAL`] until it returns `false`.
pub fn spawn_ticker<F>(mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if !on_tick() {
                break;
            }
        }
    })
}
