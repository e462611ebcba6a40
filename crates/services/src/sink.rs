use async_trait::async_trait;

use assess_core::model::{SessionId, SessionMode};

use crate::error::SinkError;

/// Receives the final score of a session.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// # Errors
    ///
    /// Returns `SinkError` if the score was not recorded.
    async fn submit_score(
        &self,
        session_id: &SessionId,
        mode: SessionMode,
        score_percent: u8,
    ) -> Result<(), SinkError>;
}
