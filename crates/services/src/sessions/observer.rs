use assess_core::model::AggregateResult;

/// Hooks for a UI that presents a running session.
///
/// Every method has an empty default. Callbacks may run on a timer task, so
/// they must be cheap and must not call back into the session synchronously.
pub trait SessionObserver: Send + Sync {
    fn on_tick(&self, _remaining_seconds: u64) {}

    /// Time ran out. Fired once, before the automatic finalize begins.
    fn on_expired(&self) {}

    fn on_finalized(&self, _result: &AggregateResult) {}

    fn on_aborted(&self) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
