use std::fmt;

use tokio::sync::watch;

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Uninitialized,
    Active,
    Finalizing,
    Finalized,
    Aborted,
}

impl SessionPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Active => "active",
            SessionPhase::Finalizing => "finalizing",
            SessionPhase::Finalized => "finalized",
            SessionPhase::Aborted => "aborted",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finalized | SessionPhase::Aborted)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LifecycleState {
    phase: SessionPhase,
    /// A finalize attempt currently owns the `Finalizing` phase.
    attempt_in_flight: bool,
}

/// Phase holder whose transitions are single atomic compare-and-set steps.
///
/// Every transition goes through `watch::Sender::send_if_modified`, which
/// runs the check and the write under one lock, so two triggers can never
/// both win the same transition.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState {
            phase: SessionPhase::Uninitialized,
            attempt_in_flight: false,
        });
        Self { tx }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.tx.borrow().phase
    }

    pub(crate) fn activate(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Uninitialized {
                return false;
            }
            state.phase = SessionPhase::Active;
            true
        })
    }

    /// Reopen a session that was scored but whose score never reached the
    /// submission sink. It starts out waiting for a retry.
    pub(crate) fn restore_pending(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Uninitialized {
                return false;
            }
            state.phase = SessionPhase::Finalizing;
            state.attempt_in_flight = false;
            true
        })
    }

    /// Claim the right to run a finalize attempt.
    ///
    /// Succeeds from `Active`, or from `Finalizing` when the previous attempt
    /// gave up at the submission sink.
    pub(crate) fn begin_finalize(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let claimable = match state.phase {
                SessionPhase::Active => true,
                SessionPhase::Finalizing => !state.attempt_in_flight,
                _ => false,
            };
            if !claimable {
                return false;
            }
            state.phase = SessionPhase::Finalizing;
            state.attempt_in_flight = true;
            true
        })
    }

    /// The running attempt failed; leave the session retryable.
    pub(crate) fn finalize_failed(&self) {
        self.tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Finalizing || !state.attempt_in_flight {
                return false;
            }
            state.attempt_in_flight = false;
            true
        });
    }

    pub(crate) fn complete(&self) {
        self.tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Finalizing {
                return false;
            }
            state.phase = SessionPhase::Finalized;
            state.attempt_in_flight = false;
            true
        });
    }

    /// The running attempt found the session already closed by another
    /// handle. Ends in `Finalized` if that handle submitted it, `Aborted`
    /// otherwise.
    pub(crate) fn closed_elsewhere(&self, finalized: bool) {
        self.tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Finalizing || !state.attempt_in_flight {
                return false;
            }
            state.phase = if finalized {
                SessionPhase::Finalized
            } else {
                SessionPhase::Aborted
            };
            state.attempt_in_flight = false;
            true
        });
    }

    /// Claim the abort transition. Allowed while active or while a failed
    /// finalize is waiting for a retry.
    pub(crate) fn begin_abort(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let abortable = match state.phase {
                SessionPhase::Active => true,
                SessionPhase::Finalizing => !state.attempt_in_flight,
                _ => false,
            };
            if !abortable {
                return false;
            }
            state.phase = SessionPhase::Aborted;
            true
        })
    }

    /// Resolves once the session is terminal or waiting for a finalize retry.
    pub(crate) async fn settled(&self) -> SessionPhase {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|state| {
                state.phase.is_terminal()
                    || (state.phase == SessionPhase::Finalizing && !state.attempt_in_flight)
            })
            .await;
        match settled {
            Ok(state) => state.phase,
            // The sender lives in `self`, so the channel cannot be closed here.
            Err(_) => self.phase(),
        }
    }

    /// True when the last finalize attempt failed and another may be started.
    pub(crate) fn awaiting_retry(&self) -> bool {
        let state = *self.tx.borrow();
        state.phase == SessionPhase::Finalizing && !state.attempt_in_flight
    }
}
