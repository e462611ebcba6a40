use async_trait::async_trait;

use assess_core::model::{CandidateId, SessionId, SessionProblem};

use crate::error::ProviderError;

/// What the backend hands out when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub session_id: SessionId,
    pub time_limit_minutes: u32,
    pub problems: Vec<SessionProblem>,
}

impl SessionGrant {
    /// Time limit in seconds.
    #[must_use]
    pub fn time_limit_seconds(&self) -> u64 {
        u64::from(self.time_limit_minutes) * 60
    }
}

/// Source of new assessment and practice sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidAccessCode` for unknown codes and
    /// `ProviderError::AlreadyStarted` when the candidate already used this one.
    async fn start_assessment(
        &self,
        access_code: &str,
        candidate: &CandidateId,
    ) -> Result<SessionGrant, ProviderError>;

    /// # Errors
    ///
    /// Returns `ProviderError::Unavailable` if no practice set can be issued.
    async fn start_practice(&self, candidate: &CandidateId) -> Result<SessionGrant, ProviderError>;
}
