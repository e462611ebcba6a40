//! Deadline-driven countdown.
//!
//! Remaining time is always recomputed from the absolute deadline and the
//! clock. The tick cadence only decides how often observers hear about it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use assess_core::Clock;
use assess_core::time::remaining_seconds;

/// Receives countdown updates from a running `SessionTimer`.
///
/// Callbacks run while the timer's dispatch gate is held and must not block.
pub trait TimerObserver: Send + Sync {
    fn on_tick(&self, remaining_seconds: u64);

    /// Called exactly once, when remaining time reaches zero.
    fn on_expired(&self);
}

/// Tick cadence for session timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub tick: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

impl TimerConfig {
    pub const TICK_ENV: &'static str = "ASSESS_TICK_MS";

    #[must_use]
    pub fn with_tick(tick: Duration) -> Self {
        Self { tick }
    }

    /// Reads `ASSESS_TICK_MS`, falling back to the default cadence when the
    /// variable is unset, empty, zero or malformed.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(Self::TICK_ENV) {
            Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Self::with_tick(Duration::from_millis(ms)),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid {}", Self::TICK_ENV);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    cancelled: bool,
    expired: bool,
    floor: Option<u64>,
}

/// Shared between the timer handle and its tick task.
struct TimerState {
    clock: Clock,
    deadline_ms: i64,
    gate: Mutex<Gate>,
}

impl TimerState {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remaining seconds, never above a value already reported.
    fn sample(&self, gate: &mut Gate) -> u64 {
        let now = remaining_seconds(self.deadline_ms, self.clock.now_ms());
        let value = gate.floor.map_or(now, |floor| floor.min(now));
        gate.floor = Some(value);
        value
    }
}

/// Countdown toward a fixed deadline.
///
/// Dropping the timer stops it.
pub struct SessionTimer {
    state: Arc<TimerState>,
    task: Option<JoinHandle<()>>,
}

impl SessionTimer {
    /// Start counting down toward `deadline_ms`.
    ///
    /// When the deadline has already passed, `on_expired` runs before this
    /// returns and no tick task is spawned. Otherwise a tokio task is spawned,
    /// so this must be called from within a runtime.
    pub fn start(
        clock: Clock,
        deadline_ms: i64,
        config: TimerConfig,
        observer: Arc<dyn TimerObserver>,
    ) -> Self {
        let state = Arc::new(TimerState {
            clock,
            deadline_ms,
            gate: Mutex::new(Gate::default()),
        });

        {
            let mut gate = state.gate();
            if state.sample(&mut gate) == 0 {
                gate.expired = true;
                tracing::debug!(deadline_ms, "deadline already passed at timer start");
                observer.on_expired();
                return Self { state: Arc::clone(&state), task: None };
            }
        }

        let task = tokio::spawn(run_ticks(Arc::clone(&state), config.tick, observer));
        Self {
            state,
            task: Some(task),
        }
    }

    #[must_use]
    pub fn deadline_ms(&self) -> i64 {
        self.state.deadline_ms
    }

    /// Current remaining seconds. Never increases between calls.
    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        let mut gate = self.state.gate();
        self.state.sample(&mut gate)
    }

    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.state.gate().expired
    }

    /// True while the tick task is alive and the timer was not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let cancelled = self.state.gate().cancelled;
        !cancelled && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the countdown. No callback is delivered after this returns.
    pub fn stop(&self) {
        self.state.gate().cancelled = true;
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticks(state: Arc<TimerState>, period: Duration, observer: Arc<dyn TimerObserver>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut gate = state.gate();
        if gate.cancelled {
            return;
        }
        let remaining = state.sample(&mut gate);
        if remaining == 0 {
            gate.expired = true;
            tracing::info!(deadline_ms = state.deadline_ms, "session timer expired");
            observer.on_expired();
            return;
        }
        observer.on_tick(remaining);
    }
}
