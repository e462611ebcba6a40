use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Mutex as AsyncMutex;

use assess_core::Clock;
use assess_core::model::{
    AggregateResult, Language, ProblemResult, SessionId, SessionMode, SessionProblem,
    SessionRecord, Verdict,
};
use storage::repository::SessionStore;

use super::lifecycle::{Lifecycle, SessionPhase};
use super::observer::SessionObserver;
use super::progress::SessionProgress;
use crate::error::SessionError;
use crate::judge::JudgeClient;
use crate::sink::SubmissionSink;
use crate::timer::{SessionTimer, TimerConfig, TimerObserver};

//
// ─── FINALIZE TRIGGER ──────────────────────────────────────────────────────────
//

/// What asked for the session to be finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    Manual,
    Expiry,
}

//
// ─── COLLABORATORS ─────────────────────────────────────────────────────────────
//

/// Everything an active session talks to.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub clock: Clock,
    pub store: Arc<dyn SessionStore>,
    pub judge: Arc<dyn JudgeClient>,
    pub sink: Arc<dyn SubmissionSink>,
    pub observer: Arc<dyn SessionObserver>,
    pub timer: TimerConfig,
}

/// The problem on screen and its unsaved editor text.
struct Workspace {
    current_index: usize,
    buffer: String,
}

struct SessionInner {
    parts: Collaborators,
    lifecycle: Lifecycle,
    record: Mutex<SessionRecord>,
    session_id: SessionId,
    mode: SessionMode,
    problems: Vec<SessionProblem>,
    deadline_ms: i64,
    /// Held across every draft flush so finalize and exit never race a write.
    workspace: AsyncMutex<Workspace>,
    current_index: AtomicUsize,
    timer: Mutex<Option<SessionTimer>>,
    /// Result of an attempt whose score never reached the sink.
    pending_result: Mutex<Option<AggregateResult>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    fn stop_timer(&self) {
        if let Some(timer) = lock(&self.timer).as_ref() {
            timer.stop();
        }
    }

    fn language(&self) -> Language {
        lock(&self.record).language()
    }
}

//
// ─── ACTIVE SESSION ────────────────────────────────────────────────────────────
//

/// Non-owning reference to a session, held by the engine's registry.
#[derive(Clone)]
pub(crate) struct SessionRef(Weak<SessionInner>);

impl SessionRef {
    pub(crate) fn upgrade(&self) -> Option<ActiveSession> {
        self.0.upgrade().map(|inner| ActiveSession { inner })
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Handle to a started or resumed session.
///
/// Cheap to clone; clones drive the same session. Every operation other than
/// the accessors requires the session to be `Active` unless stated otherwise.
#[derive(Clone)]
pub struct ActiveSession {
    inner: Arc<SessionInner>,
}

impl ActiveSession {
    /// Activate a persisted record and start its countdown.
    ///
    /// If the deadline has already passed the expiry path runs before this
    /// returns. A record that was scored but never submitted comes back
    /// waiting for a retry, with no countdown.
    pub(crate) async fn launch(
        parts: Collaborators,
        record: SessionRecord,
    ) -> Result<Self, SessionError> {
        let session_id = record.session_id().clone();
        let buffer = parts
            .store
            .get_draft(&session_id, 0)
            .await?
            .unwrap_or_default();
        let pending = record.pending_result().cloned();
        let restored_score = pending.as_ref().map(AggregateResult::score_percent);

        let inner = Arc::new(SessionInner {
            lifecycle: Lifecycle::new(),
            session_id,
            mode: record.mode(),
            problems: record.problems().to_vec(),
            deadline_ms: record.deadline_ms(),
            record: Mutex::new(record),
            workspace: AsyncMutex::new(Workspace {
                current_index: 0,
                buffer,
            }),
            current_index: AtomicUsize::new(0),
            timer: Mutex::new(None),
            pending_result: Mutex::new(pending),
            parts,
        });

        if let Some(score_percent) = restored_score {
            inner.lifecycle.restore_pending();
            tracing::info!(
                session_id = %inner.session_id,
                score_percent,
                "session scored earlier; waiting to resubmit"
            );
            return Ok(Self { inner });
        }
        inner.lifecycle.activate();

        let remaining = assess_core::time::remaining_seconds(
            inner.deadline_ms,
            inner.parts.clock.now_ms(),
        );
        tracing::info!(
            session_id = %inner.session_id,
            mode = %inner.mode,
            problems = inner.problems.len(),
            remaining_seconds = remaining,
            "session active"
        );

        let relay: Arc<dyn TimerObserver> = Arc::new(ExpiryRelay {
            session: Arc::downgrade(&inner),
            observer: Arc::clone(&inner.parts.observer),
        });
        let timer = SessionTimer::start(
            inner.parts.clock.clone(),
            inner.deadline_ms,
            inner.parts.timer,
            relay,
        );
        *lock(&inner.timer) = Some(timer);

        Ok(Self { inner })
    }

    pub(crate) fn downgrade(&self) -> SessionRef {
        SessionRef(Arc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.inner.mode
    }

    #[must_use]
    pub fn problems(&self) -> &[SessionProblem] {
        &self.inner.problems
    }

    #[must_use]
    pub fn problem(&self, index: usize) -> Option<&SessionProblem> {
        self.inner.problems.get(index)
    }

    #[must_use]
    pub fn current_problem(&self) -> Option<&SessionProblem> {
        self.problem(self.current_problem_index())
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.lifecycle.phase()
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.inner.language()
    }

    #[must_use]
    pub fn deadline_ms(&self) -> i64 {
        self.inner.deadline_ms
    }

    /// Seconds left before the deadline. Never increases.
    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        match lock(&self.inner.timer).as_ref() {
            Some(timer) => timer.remaining_seconds(),
            None => assess_core::time::remaining_seconds(
                self.inner.deadline_ms,
                self.inner.parts.clock.now_ms(),
            ),
        }
    }

    #[must_use]
    pub fn current_problem_index(&self) -> usize {
        self.inner.current_index.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            current_index: self.current_problem_index(),
            total_problems: self.inner.problems.len(),
            remaining_seconds: self.remaining_seconds(),
            phase: self.phase(),
        }
    }

    /// True when a finalize attempt failed at the submission sink and
    /// `submit` may be called again.
    #[must_use]
    pub fn awaiting_retry(&self) -> bool {
        self.inner.lifecycle.awaiting_retry()
    }

    /// Wait until the session is finalized, aborted, or waiting for a retry.
    pub async fn settled(&self) -> SessionPhase {
        self.inner.lifecycle.settled().await
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase() {
            SessionPhase::Active => Ok(()),
            phase => Err(SessionError::NotActive { phase }),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), SessionError> {
        let count = self.inner.problems.len();
        if index >= count {
            return Err(SessionError::InvalidProblemIndex { index, count });
        }
        Ok(())
    }

    //
    // ─── NAVIGATION AND DRAFTS ─────────────────────────────────────────────────
    //

    /// Switch to another problem, saving the outgoing editor text first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidProblemIndex` for an unknown index,
    /// `SessionError::NotActive` once the session left `Active`, or a storage
    /// error if the draft could not be saved.
    pub async fn go_to_problem(&self, index: usize) -> Result<(), SessionError> {
        self.check_index(index)?;
        self.ensure_active()?;

        let inner = &self.inner;
        let mut workspace = inner.workspace.lock().await;
        // Finalize or exit may have won while this call waited for the lock.
        self.ensure_active()?;
        if workspace.current_index == index {
            return Ok(());
        }

        inner
            .parts
            .store
            .put_draft(&inner.session_id, workspace.current_index, &workspace.buffer)
            .await?;
        let incoming = inner
            .parts
            .store
            .get_draft(&inner.session_id, index)
            .await?
            .unwrap_or_default();

        tracing::debug!(
            session_id = %inner.session_id,
            from = workspace.current_index,
            to = index,
            "navigated"
        );
        workspace.current_index = index;
        workspace.buffer = incoming;
        inner.current_index.store(index, Ordering::SeqCst);
        Ok(())
    }

    /// # Errors
    ///
    /// Same as [`ActiveSession::go_to_problem`]; fails with
    /// `InvalidProblemIndex` on the last problem.
    pub async fn next_problem(&self) -> Result<usize, SessionError> {
        let next = self.current_problem_index() + 1;
        self.go_to_problem(next).await?;
        Ok(next)
    }

    /// # Errors
    ///
    /// Same as [`ActiveSession::go_to_problem`]; fails with
    /// `InvalidProblemIndex` on the first problem.
    pub async fn previous_problem(&self) -> Result<usize, SessionError> {
        let current = self.current_problem_index();
        let Some(previous) = current.checked_sub(1) else {
            return Err(SessionError::InvalidProblemIndex {
                index: current,
                count: self.inner.problems.len(),
            });
        };
        self.go_to_problem(previous).await?;
        Ok(previous)
    }

    /// Code saved for problem `index`, or the live editor text for the
    /// current problem. Empty when nothing was written. Works in any phase.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidProblemIndex` or a storage error.
    pub async fn get_draft_code(&self, index: usize) -> Result<String, SessionError> {
        self.check_index(index)?;
        let inner = &self.inner;
        let workspace = inner.workspace.lock().await;
        if workspace.current_index == index {
            return Ok(workspace.buffer.clone());
        }
        drop(workspace);

        Ok(inner
            .parts
            .store
            .get_draft(&inner.session_id, index)
            .await?
            .unwrap_or_default())
    }

    /// Save `code` as the draft for problem `index`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidProblemIndex`, `SessionError::NotActive`,
    /// or a storage error.
    pub async fn set_draft_code(&self, index: usize, code: &str) -> Result<(), SessionError> {
        self.check_index(index)?;
        self.ensure_active()?;

        let inner = &self.inner;
        let mut workspace = inner.workspace.lock().await;
        self.ensure_active()?;
        inner
            .parts
            .store
            .put_draft(&inner.session_id, index, code)
            .await?;
        if workspace.current_index == index {
            code.clone_into(&mut workspace.buffer);
        }
        Ok(())
    }

    /// Change the language every draft is judged in.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` or a storage error.
    pub async fn set_language(&self, language: Language) -> Result<(), SessionError> {
        self.ensure_active()?;
        let snapshot = {
            let mut record = lock(&self.inner.record);
            record.set_language(language);
            record.clone()
        };
        self.inner.parts.store.put_session(&snapshot).await?;
        tracing::debug!(session_id = %self.inner.session_id, %language, "language changed");
        Ok(())
    }

    //
    // ─── EXECUTION ─────────────────────────────────────────────────────────────
    //

    /// Run `code` against the current problem without grading it.
    ///
    /// Does not save a draft.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive`, or `SessionError::Judge` when the
    /// judge is unreachable. The session stays usable either way.
    pub async fn run_current(&self, code: &str, language: Language) -> Result<Verdict, SessionError> {
        self.ensure_active()?;
        let index = self.current_problem_index();
        let problem = self.inner.problems.get(index).ok_or(SessionError::InvalidProblemIndex {
            index,
            count: self.inner.problems.len(),
        })?;

        let verdict = self.inner.parts.judge.run(problem.id, code, language).await?;
        Ok(verdict)
    }

    /// Save `code` as the current draft and grade it against the problem's
    /// full test set. Only available in practice sessions; the session keeps
    /// running and the final score still comes from finalize.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ModeMismatch` in assessment sessions,
    /// `SessionError::NotActive`, `SessionError::Judge`, or a storage error.
    pub async fn check_current(&self, code: &str) -> Result<Verdict, SessionError> {
        if self.inner.mode != SessionMode::Practice {
            return Err(SessionError::ModeMismatch {
                mode: self.inner.mode,
            });
        }
        self.ensure_active()?;

        let inner = &self.inner;
        let problem_id = {
            let mut workspace = inner.workspace.lock().await;
            self.ensure_active()?;
            let index = workspace.current_index;
            inner.parts.store.put_draft(&inner.session_id, index, code).await?;
            code.clone_into(&mut workspace.buffer);
            inner.problems[index].id
        };

        let verdict = inner
            .parts
            .judge
            .evaluate(problem_id, code, inner.language())
            .await?;
        Ok(verdict)
    }

    //
    // ─── FINALIZE AND EXIT ─────────────────────────────────────────────────────
    //

    /// User-triggered finalize.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` if another trigger already finalized
    /// or is finalizing the session, and `SessionError::Sink` if the score
    /// could not be submitted (the session then stays retryable).
    pub async fn submit(&self) -> Result<AggregateResult, SessionError> {
        match self.finalize(FinalizeTrigger::Manual).await? {
            Some(result) => Ok(result),
            None => Err(SessionError::NotActive {
                phase: self.phase(),
            }),
        }
    }

    /// Score every problem and hand the result to the submission sink.
    ///
    /// Returns `Ok(None)` when another trigger owns finalization, or when
    /// the stored slot shows the session was already submitted or abandoned
    /// through another handle. A retry after a sink failure reuses the
    /// already computed result, which is also persisted so a restart comes
    /// back waiting for that retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Sink` if the score could not be submitted.
    pub async fn finalize(
        &self,
        trigger: FinalizeTrigger,
    ) -> Result<Option<AggregateResult>, SessionError> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_finalize() {
            tracing::debug!(
                session_id = %inner.session_id,
                ?trigger,
                phase = %inner.lifecycle.phase(),
                "finalize ignored"
            );
            return Ok(None);
        }
        tracing::info!(session_id = %inner.session_id, ?trigger, "finalizing session");
        inner.stop_timer();

        if self.settle_if_closed_elsewhere().await {
            return Ok(None);
        }

        let cached = lock(&inner.pending_result).clone();
        let result = match cached {
            Some(result) => result,
            None => {
                let result = self.evaluate_all().await;
                *lock(&inner.pending_result) = Some(result.clone());
                if self.settle_if_closed_elsewhere().await {
                    return Ok(None);
                }
                self.persist_pending(&result).await;
                result
            }
        };

        if let Err(err) = inner
            .parts
            .sink
            .submit_score(&inner.session_id, inner.mode, result.score_percent())
            .await
        {
            tracing::warn!(
                session_id = %inner.session_id,
                error = %err,
                "score submission failed; session stays finalizing"
            );
            inner.lifecycle.finalize_failed();
            return Err(err.into());
        }

        self.discard_persisted_state().await;
        inner.lifecycle.complete();
        tracing::info!(
            session_id = %inner.session_id,
            score_percent = result.score_percent(),
            passed = result.passed_count(),
            total = result.total_problems(),
            "session finalized"
        );
        inner.parts.observer.on_finalized(&result);
        Ok(Some(result))
    }

    /// Check the stored slot before scoring or submitting. Another handle to
    /// the same session, possibly in another process, may have submitted or
    /// abandoned it already; this attempt then ends without calling the sink.
    async fn settle_if_closed_elsewhere(&self) -> bool {
        let inner = &self.inner;
        let finalized = match inner.parts.store.get_session(&inner.session_id).await {
            Ok(Some(record)) if !record.is_finalized() => return false,
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(
                    session_id = %inner.session_id,
                    error = %err,
                    "could not re-read session slot; continuing"
                );
                return false;
            }
        };

        *lock(&inner.pending_result) = None;
        inner.lifecycle.closed_elsewhere(finalized);
        tracing::info!(
            session_id = %inner.session_id,
            phase = %inner.lifecycle.phase(),
            "session already closed by another handle; not submitting"
        );
        true
    }

    /// Record the computed score so a restart resumes straight into the
    /// retry state instead of reopening the editor.
    async fn persist_pending(&self, result: &AggregateResult) {
        let inner = &self.inner;
        let snapshot = {
            let mut record = lock(&inner.record);
            record.set_pending_result(result.clone());
            record.clone()
        };
        if let Err(err) = inner.parts.store.put_session(&snapshot).await {
            tracing::warn!(session_id = %inner.session_id, error = %err, "could not persist pending score");
        }
    }

    /// Flush the editor, then judge every problem in order.
    async fn evaluate_all(&self) -> AggregateResult {
        let inner = &self.inner;
        let store = &inner.parts.store;

        let (current_index, buffer) = {
            let workspace = inner.workspace.lock().await;
            if let Err(err) = store
                .put_draft(&inner.session_id, workspace.current_index, &workspace.buffer)
                .await
            {
                tracing::warn!(session_id = %inner.session_id, error = %err, "final draft flush failed");
            }
            (workspace.current_index, workspace.buffer.clone())
        };

        let language = inner.language();
        let mut results = Vec::with_capacity(inner.problems.len());
        for (index, problem) in inner.problems.iter().enumerate() {
            let code = if index == current_index {
                Some(buffer.clone())
            } else {
                match store.get_draft(&inner.session_id, index).await {
                    Ok(code) => code,
                    Err(err) => {
                        tracing::warn!(index, error = %err, "draft unreadable; scoring as failed");
                        None
                    }
                }
            };

            let Some(code) = code.filter(|code| !code.trim().is_empty()) else {
                results.push(ProblemResult::failed(problem.title.as_str()));
                continue;
            };

            let result = match inner.parts.judge.evaluate(problem.id, &code, language).await {
                Ok(verdict) => ProblemResult::from_verdict(problem.title.as_str(), &verdict),
                Err(err) => {
                    tracing::warn!(
                        index,
                        problem_id = %problem.id,
                        error = %err,
                        "judge unavailable; scoring as failed"
                    );
                    ProblemResult::failed(problem.title.as_str())
                }
            };
            results.push(result);
        }

        AggregateResult::from_problem_results(results)
    }

    /// Remove the record and drafts after a successful submission.
    ///
    /// The record is first rewritten as finalized so a crash between the two
    /// deletes leaves something resume knows to discard.
    async fn discard_persisted_state(&self) {
        let inner = &self.inner;
        let store = &inner.parts.store;
        let snapshot = {
            let mut record = lock(&inner.record);
            record.mark_finalized();
            record.clone()
        };

        if let Err(err) = store.put_session(&snapshot).await {
            tracing::warn!(session_id = %inner.session_id, error = %err, "could not mark session finalized");
        }
        if let Err(err) = store.delete_drafts(&inner.session_id).await {
            tracing::warn!(session_id = %inner.session_id, error = %err, "could not delete drafts");
        }
        if let Err(err) = store.delete_session(&inner.session_id).await {
            tracing::warn!(session_id = %inner.session_id, error = %err, "could not delete session record");
        }
        *lock(&inner.pending_result) = None;
    }

    /// Abandon the session without scoring it.
    ///
    /// Allowed while active or while a failed finalize awaits a retry. The
    /// caller is responsible for confirming with the user first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotActive` if the session cannot be aborted, or
    /// a storage error if its persisted state could not be removed. The
    /// session is aborted in the latter case too.
    pub async fn exit(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        if !inner.lifecycle.begin_abort() {
            return Err(SessionError::NotActive {
                phase: inner.lifecycle.phase(),
            });
        }
        inner.stop_timer();

        let _workspace = inner.workspace.lock().await;
        let drafts = inner.parts.store.delete_drafts(&inner.session_id).await;
        let record = inner.parts.store.delete_session(&inner.session_id).await;
        *lock(&inner.pending_result) = None;

        tracing::info!(session_id = %inner.session_id, "session aborted");
        inner.parts.observer.on_aborted();
        drafts?;
        record?;
        Ok(())
    }
}

//
// ─── TIMER BRIDGE ──────────────────────────────────────────────────────────────
//

/// Forwards timer events to the session without keeping it alive.
struct ExpiryRelay {
    session: Weak<SessionInner>,
    observer: Arc<dyn SessionObserver>,
}

impl TimerObserver for ExpiryRelay {
    fn on_tick(&self, remaining_seconds: u64) {
        self.observer.on_tick(remaining_seconds);
    }

    fn on_expired(&self) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let session = ActiveSession { inner };
        if session.phase() == SessionPhase::Active {
            tracing::info!(session_id = %session.session_id(), "session time expired");
            self.observer.on_expired();
        }

        // The handle moves into the task so the session is never dropped on
        // the timer's own task.
        tokio::spawn(async move {
            if let Err(err) = session.finalize(FinalizeTrigger::Expiry).await {
                tracing::warn!(
                    session_id = %session.session_id(),
                    error = %err,
                    "automatic finalize did not complete"
                );
            }
        });
    }
}
