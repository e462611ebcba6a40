use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AggregateResult, Language, ProblemId, SessionId};
use crate::time::remaining_seconds;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionRecordError {
    #[error("session has no problems")]
    NoProblems,

    #[error("time limit must be greater than zero")]
    ZeroTimeLimit,

    #[error("time limit of {seconds}s cannot be represented")]
    TimeLimitOverflow { seconds: u64 },
}

/// Which flow a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Assessment,
    Practice,
}

impl SessionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Assessment => "assessment",
            SessionMode::Practice => "practice",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A problem as presented inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProblem {
    pub id: ProblemId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

impl SessionProblem {
    #[must_use]
    pub fn new(id: ProblemId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            difficulty: None,
        }
    }

    #[must_use]
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }
}

/// One timed attempt, as persisted in the session slot.
///
/// `started_at_ms` is the only input to remaining-time computation; nothing
/// about a previously displayed countdown is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSessionRecord")]
pub struct SessionRecord {
    session_id: SessionId,
    mode: SessionMode,
    problems: Vec<SessionProblem>,
    time_limit_seconds: u64,
    started_at_ms: i64,
    language: Language,
    finalized: bool,
    /// Scored but not yet accepted by the submission sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_result: Option<AggregateResult>,
}

impl SessionRecord {
    /// Build a fresh, not yet finalized record.
    ///
    /// # Errors
    ///
    /// Returns `SessionRecordError::NoProblems` for an empty problem list,
    /// `SessionRecordError::ZeroTimeLimit` for a zero time limit and
    /// `SessionRecordError::TimeLimitOverflow` if the deadline cannot be
    /// represented in epoch milliseconds.
    pub fn new(
        session_id: SessionId,
        mode: SessionMode,
        problems: Vec<SessionProblem>,
        time_limit_seconds: u64,
        started_at_ms: i64,
    ) -> Result<Self, SessionRecordError> {
        if problems.is_empty() {
            return Err(SessionRecordError::NoProblems);
        }
        if time_limit_seconds == 0 {
            return Err(SessionRecordError::ZeroTimeLimit);
        }
        let limit_ms = time_limit_seconds
            .checked_mul(1000)
            .and_then(|ms| i64::try_from(ms).ok())
            .ok_or(SessionRecordError::TimeLimitOverflow {
                seconds: time_limit_seconds,
            })?;
        if started_at_ms.checked_add(limit_ms).is_none() {
            return Err(SessionRecordError::TimeLimitOverflow {
                seconds: time_limit_seconds,
            });
        }

        Ok(Self {
            session_id,
            mode,
            problems,
            time_limit_seconds,
            started_at_ms,
            language: Language::default(),
            finalized: false,
            pending_result: None,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn problems(&self) -> &[SessionProblem] {
        &self.problems
    }

    #[must_use]
    pub fn problem(&self, index: usize) -> Option<&SessionProblem> {
        self.problems.get(index)
    }

    /// Problem ids in presentation order.
    #[must_use]
    pub fn problem_ids(&self) -> Vec<ProblemId> {
        self.problems.iter().map(|p| p.id).collect()
    }

    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.problems.len()
    }

    #[must_use]
    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_seconds
    }

    #[must_use]
    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    /// Absolute deadline in epoch milliseconds.
    #[must_use]
    pub fn deadline_ms(&self) -> i64 {
        // Bounds are checked on construction.
        let limit_ms =
            i64::try_from(self.time_limit_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.started_at_ms.saturating_add(limit_ms)
    }

    #[must_use]
    pub fn remaining_seconds(&self, now_ms: i64) -> u64 {
        remaining_seconds(self.deadline_ms(), now_ms)
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.remaining_seconds(now_ms) == 0
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn mark_finalized(&mut self) {
        self.finalized = true;
        self.pending_result = None;
    }

    /// Result of a finalize attempt whose score has not been submitted yet.
    #[must_use]
    pub fn pending_result(&self) -> Option<&AggregateResult> {
        self.pending_result.as_ref()
    }

    pub fn set_pending_result(&mut self, result: AggregateResult) {
        self.pending_result = Some(result);
    }
}

/// Unvalidated persisted shape; converted through `SessionRecord::new` so a
/// malformed slot never yields a usable record.
#[derive(Deserialize)]
struct RawSessionRecord {
    session_id: SessionId,
    mode: SessionMode,
    problems: Vec<SessionProblem>,
    time_limit_seconds: u64,
    started_at_ms: i64,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    finalized: bool,
    #[serde(default)]
    pending_result: Option<AggregateResult>,
}

impl TryFrom<RawSessionRecord> for SessionRecord {
    type Error = SessionRecordError;

    fn try_from(raw: RawSessionRecord) -> Result<Self, Self::Error> {
        let mut record = SessionRecord::new(
            raw.session_id,
            raw.mode,
            raw.problems,
            raw.time_limit_seconds,
            raw.started_at_ms,
        )?;
        record.language = raw.language;
        record.finalized = raw.finalized;
        if !record.finalized {
            record.pending_result = raw.pending_result;
        }
        Ok(record)
    }
}
