#![forbid(unsafe_code)]

pub mod backend;
pub mod error;
pub mod judge;
pub mod provider;
pub mod sessions;
pub mod sink;
pub mod timer;

pub use assess_core::Clock;
pub use sessions as session;

pub use backend::{BackendClient, BackendConfig};
pub use error::{
    BackendConfigError, BackendError, JudgeUnavailable, ProviderError, SessionError, SinkError,
};
pub use judge::JudgeClient;
pub use provider::{SessionGrant, SessionProvider};
pub use sink::SubmissionSink;
pub use timer::{SessionTimer, TimerConfig, TimerObserver};

pub use sessions::{
    ActiveSession, FinalizeTrigger, NoopObserver, SessionEngine, SessionObserver, SessionPhase,
    SessionProgress,
};
