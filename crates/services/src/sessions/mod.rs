mod lifecycle;
mod observer;
mod progress;
mod service;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use lifecycle::SessionPhase;
pub use observer::{NoopObserver, SessionObserver};
pub use progress::SessionProgress;
pub use service::{ActiveSession, FinalizeTrigger};
pub use workflow::SessionEngine;
