use async_trait::async_trait;

use assess_core::model::{Language, ProblemId, Verdict};

use crate::error::JudgeUnavailable;

/// Executes candidate code against a problem's test cases.
///
/// Code that fails to compile or crashes is reported through the returned
/// `Verdict`; only transport-level failures are errors.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Exploratory execution with no grading side effect.
    ///
    /// # Errors
    ///
    /// Returns `JudgeUnavailable` if the judge cannot be reached.
    async fn run(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
    ) -> Result<Verdict, JudgeUnavailable>;

    /// Graded execution against the full hidden test set.
    ///
    /// # Errors
    ///
    /// Returns `JudgeUnavailable` if the judge cannot be reached.
    async fn evaluate(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
    ) -> Result<Verdict, JudgeUnavailable>;
}
