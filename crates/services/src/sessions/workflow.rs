use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use assess_core::Clock;
use assess_core::model::{CandidateId, SessionId, SessionMode, SessionRecord};
use storage::repository::SessionStore;

use super::observer::{NoopObserver, SessionObserver};
use super::service::{ActiveSession, Collaborators, SessionRef};
use crate::error::SessionError;
use crate::judge::JudgeClient;
use crate::provider::{SessionGrant, SessionProvider};
use crate::sink::SubmissionSink;
use crate::timer::TimerConfig;

type LiveSessions = HashMap<SessionId, SessionRef>;

/// Running handle for `id`, unless it was dropped or already ended.
fn live_handle(live: &LiveSessions, id: &SessionId) -> Option<ActiveSession> {
    live.get(id)
        .and_then(SessionRef::upgrade)
        .filter(|session| !session.phase().is_terminal())
}

fn register(live: &mut LiveSessions, session: &ActiveSession) {
    live.retain(|_, handle| !handle.is_dropped());
    live.insert(session.session_id().clone(), session.downgrade());
}

/// Starts and resumes timed sessions.
///
/// Owns the collaborators every session needs. A session that is still
/// running in this engine (or a clone of it) is handed back as the same
/// `ActiveSession` instead of being launched a second time.
#[derive(Clone)]
pub struct SessionEngine {
    clock: Clock,
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn SessionProvider>,
    judge: Arc<dyn JudgeClient>,
    sink: Arc<dyn SubmissionSink>,
    observer: Arc<dyn SessionObserver>,
    timer: TimerConfig,
    live: Arc<AsyncMutex<LiveSessions>>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn SessionProvider>,
        judge: Arc<dyn JudgeClient>,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        Self {
            clock,
            store,
            provider,
            judge,
            sink,
            observer: Arc::new(NoopObserver),
            timer: TimerConfig::default(),
            live: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_timer_config(mut self, timer: TimerConfig) -> Self {
        self.timer = timer;
        self
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            clock: self.clock.clone(),
            store: Arc::clone(&self.store),
            judge: Arc::clone(&self.judge),
            sink: Arc::clone(&self.sink),
            observer: Arc::clone(&self.observer),
            timer: self.timer,
        }
    }

    /// Start a timed assessment with an access code.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Provider` when the backend refuses the code,
    /// `SessionError::Empty` for an assessment without problems, or a storage
    /// error if the session could not be persisted.
    pub async fn start_assessment(
        &self,
        access_code: &str,
        candidate: &CandidateId,
    ) -> Result<ActiveSession, SessionError> {
        let grant = self
            .provider
            .start_assessment(access_code.trim(), candidate)
            .await?;
        self.open(SessionMode::Assessment, grant).await
    }

    /// Start a practice session.
    ///
    /// # Errors
    ///
    /// Same as [`SessionEngine::start_assessment`].
    pub async fn start_practice(
        &self,
        candidate: &CandidateId,
    ) -> Result<ActiveSession, SessionError> {
        let grant = self.provider.start_practice(candidate).await?;
        self.open(SessionMode::Practice, grant).await
    }

    async fn open(
        &self,
        mode: SessionMode,
        grant: SessionGrant,
    ) -> Result<ActiveSession, SessionError> {
        if grant.problems.is_empty() {
            return Err(SessionError::Empty);
        }
        let time_limit_seconds = grant.time_limit_seconds();
        if time_limit_seconds == 0 {
            return Err(SessionError::InvalidTimeLimit);
        }

        let mut live = self.live.lock().await;
        if let Some(running) = live_handle(&live, &grant.session_id) {
            tracing::info!(session_id = %grant.session_id, "session already running");
            return Ok(running);
        }

        self.discard_stale(&grant.session_id).await?;

        let record = SessionRecord::new(
            grant.session_id,
            mode,
            grant.problems,
            time_limit_seconds,
            self.clock.now_ms(),
        )?;
        self.store.put_session(&record).await?;
        tracing::info!(
            session_id = %record.session_id(),
            %mode,
            time_limit_seconds,
            "session started"
        );

        let session = ActiveSession::launch(self.collaborators(), record).await?;
        register(&mut live, &session);
        Ok(session)
    }

    /// Free the session slot for `incoming`.
    async fn discard_stale(&self, incoming: &SessionId) -> Result<(), SessionError> {
        match self.store.current_session().await {
            Ok(Some(existing)) if existing.session_id() != incoming => {
                tracing::warn!(
                    stale = %existing.session_id(),
                    incoming = %incoming,
                    "discarding stale session"
                );
                self.store.delete_drafts(existing.session_id()).await?;
                self.store.delete_session(existing.session_id()).await?;
            }
            Ok(_) => {}
            Err(err) if err.is_corruption() => {
                tracing::warn!(error = %err, "clearing unreadable session slot");
                self.store.clear_session_slot().await?;
                self.sweep_orphaned_drafts().await;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Drafts of a session that no longer owns the slot can never be read.
    async fn sweep_orphaned_drafts(&self) {
        if let Err(err) = self.store.delete_orphaned_drafts().await {
            tracing::warn!(error = %err, "could not remove orphaned drafts");
        }
    }

    /// Pick up the session left in the store, if any.
    ///
    /// Remaining time is recomputed from the persisted start instant. A
    /// session whose deadline already passed expires before this returns and
    /// finalizes in the background. An unreadable record is cleared and
    /// treated as absent. If the session is already running in this engine
    /// its existing handle is returned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read or cleaned up.
    pub async fn resume(&self) -> Result<Option<ActiveSession>, SessionError> {
        let mut live = self.live.lock().await;
        let record = match self.store.current_session().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.sweep_orphaned_drafts().await;
                return Ok(None);
            }
            Err(err) if err.is_corruption() => {
                tracing::warn!(error = %err, "stored session unreadable; starting fresh");
                self.store.clear_session_slot().await?;
                self.sweep_orphaned_drafts().await;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if record.is_finalized() {
            tracing::info!(
                session_id = %record.session_id(),
                "removing leftovers of a finalized session"
            );
            self.store.delete_drafts(record.session_id()).await?;
            self.store.delete_session(record.session_id()).await?;
            return Ok(None);
        }

        if let Some(running) = live_handle(&live, record.session_id()) {
            return Ok(Some(running));
        }

        tracing::info!(
            session_id = %record.session_id(),
            remaining_seconds = record.remaining_seconds(self.clock.now_ms()),
            "resuming session"
        );
        let session = ActiveSession::launch(self.collaborators(), record).await?;
        register(&mut live, &session);
        Ok(Some(session))
    }
}
