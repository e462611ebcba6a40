use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use assess_core::model::{
    AggregateResult, CandidateId, Language, ProblemId, SessionId, SessionMode, SessionProblem,
    SessionRecord, Verdict,
};
use assess_core::time::{ManualClock, fixed_now};
use services::{
    Clock, FinalizeTrigger, JudgeClient, JudgeUnavailable, ProviderError, SessionEngine,
    SessionError, SessionGrant, SessionObserver, SessionPhase, SessionProvider, SinkError,
    SubmissionSink, TimerConfig,
};
use storage::repository::{InMemorySessionStore, SessionStore, StorageError};

//
// ─── FAKES ─────────────────────────────────────────────────────────────────────
//

fn problems(count: u64) -> Vec<SessionProblem> {
    (0..count)
        .map(|i| SessionProblem::new(ProblemId::new(100 + i), format!("P{i}")))
        .collect()
}

struct FakeProvider {
    minutes: u32,
    problems: Vec<SessionProblem>,
    issued: AtomicUsize,
}

impl FakeProvider {
    fn new(minutes: u32, problems: Vec<SessionProblem>) -> Self {
        Self {
            minutes,
            problems,
            issued: AtomicUsize::new(0),
        }
    }

    fn grant(&self) -> SessionGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        SessionGrant {
            session_id: SessionId::new(format!("s-{n}")),
            time_limit_minutes: self.minutes,
            problems: self.problems.clone(),
        }
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn start_assessment(
        &self,
        access_code: &str,
        _candidate: &CandidateId,
    ) -> Result<SessionGrant, ProviderError> {
        match access_code {
            "bad" => Err(ProviderError::InvalidAccessCode),
            "used" => Err(ProviderError::AlreadyStarted),
            _ => Ok(self.grant()),
        }
    }

    async fn start_practice(&self, _candidate: &CandidateId) -> Result<SessionGrant, ProviderError> {
        Ok(self.grant())
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Score(u32, u32),
    Unavailable,
}

#[derive(Default)]
struct ScriptedJudge {
    outcomes: HashMap<u64, Outcome>,
    evaluations: Mutex<Vec<(u64, String, Language)>>,
    runs: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedJudge {
    fn with(outcomes: &[Outcome]) -> Self {
        Self {
            outcomes: outcomes
                .iter()
                .enumerate()
                .map(|(i, outcome)| (100 + i as u64, *outcome))
                .collect(),
            ..Self::default()
        }
    }

    fn evaluated(&self) -> Vec<(u64, String, Language)> {
        self.evaluations.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgeClient for ScriptedJudge {
    async fn run(
        &self,
        _problem_id: ProblemId,
        code: &str,
        _language: Language,
    ) -> Result<Verdict, JudgeUnavailable> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict::output_only(format!("ran {} bytes", code.len())))
    }

    async fn evaluate(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
    ) -> Result<Verdict, JudgeUnavailable> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.evaluations
            .lock()
            .unwrap()
            .push((problem_id.value(), code.to_owned(), language));
        match self.outcomes.get(&problem_id.value()) {
            Some(Outcome::Score(passed, total)) => Ok(Verdict::new(*passed, *total).unwrap()),
            Some(Outcome::Unavailable) => Err(JudgeUnavailable("connection reset".into())),
            None => Ok(Verdict::new(0, 1).unwrap()),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    attempts: Mutex<Vec<(SessionId, SessionMode, u8)>>,
    failures_left: AtomicUsize,
}

impl RecordingSink {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionSink for RecordingSink {
    async fn submit_score(
        &self,
        session_id: &SessionId,
        mode: SessionMode,
        score_percent: u8,
    ) -> Result<(), SinkError> {
        self.attempts
            .lock()
            .unwrap()
            .push((session_id.clone(), mode, score_percent));
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    ticks: AtomicUsize,
    expired: AtomicUsize,
    finalized: Mutex<Vec<u8>>,
    aborted: AtomicUsize,
}

impl SessionObserver for RecordingObserver {
    fn on_tick(&self, _remaining_seconds: u64) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn on_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finalized(&self, result: &AggregateResult) {
        self.finalized.lock().unwrap().push(result.score_percent());
    }

    fn on_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Delegating store whose draft writes take a while.
struct SlowDraftStore {
    inner: InMemorySessionStore,
    delay: Duration,
}

#[async_trait]
impl SessionStore for SlowDraftStore {
    async fn put_session(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.inner.put_session(record).await
    }

    async fn current_session(&self) -> Result<Option<SessionRecord>, StorageError> {
        self.inner.current_session().await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StorageError> {
        self.inner.delete_session(id).await
    }

    async fn clear_session_slot(&self) -> Result<(), StorageError> {
        self.inner.clear_session_slot().await
    }

    async fn put_draft(
        &self,
        session_id: &SessionId,
        index: usize,
        code: &str,
    ) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put_draft(session_id, index, code).await
    }

    async fn get_draft(
        &self,
        session_id: &SessionId,
        index: usize,
    ) -> Result<Option<String>, StorageError> {
        self.inner.get_draft(session_id, index).await
    }

    async fn delete_draft(&self, session_id: &SessionId, index: usize) -> Result<(), StorageError> {
        self.inner.delete_draft(session_id, index).await
    }

    async fn delete_drafts(&self, session_id: &SessionId) -> Result<(), StorageError> {
        self.inner.delete_drafts(session_id).await
    }

    async fn delete_orphaned_drafts(&self) -> Result<(), StorageError> {
        self.inner.delete_orphaned_drafts().await
    }
}

//
// ─── HARNESS ───────────────────────────────────────────────────────────────────
//

struct Harness {
    engine: SessionEngine,
    store: InMemorySessionStore,
    judge: Arc<ScriptedJudge>,
    sink: Arc<RecordingSink>,
    observer: Arc<RecordingObserver>,
    clock: Clock,
    time: ManualClock,
}

fn harness_with(
    provider: FakeProvider,
    judge: ScriptedJudge,
    sink: RecordingSink,
    store: Arc<dyn SessionStore>,
    backing: InMemorySessionStore,
) -> Harness {
    let (clock, time) = Clock::manual(fixed_now());
    let judge = Arc::new(judge);
    let sink = Arc::new(sink);
    let observer = Arc::new(RecordingObserver::default());
    let engine = SessionEngine::new(
        clock.clone(),
        store,
        Arc::new(provider),
        judge.clone(),
        sink.clone(),
    )
    .with_observer(observer.clone())
    .with_timer_config(TimerConfig::with_tick(Duration::from_millis(10)));

    Harness {
        engine,
        store: backing,
        judge,
        sink,
        observer,
        clock,
        time,
    }
}

fn harness(problem_count: u64, outcomes: &[Outcome], sink: RecordingSink) -> Harness {
    let store = InMemorySessionStore::new();
    harness_with(
        FakeProvider::new(30, problems(problem_count)),
        ScriptedJudge::with(outcomes),
        sink,
        Arc::new(store.clone()),
        store,
    )
}

fn candidate() -> CandidateId {
    CandidateId::new("ada@example.com")
}

//
// ─── START / RESUME ────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn start_gives_full_time_and_persists_record() {
    let h = harness(3, &[], RecordingSink::default());

    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(session.mode(), SessionMode::Assessment);
    assert_eq!(session.remaining_seconds(), 30 * 60);
    assert_eq!(session.current_problem_index(), 0);

    let record = h.store.current_session().await.unwrap().expect("persisted");
    assert_eq!(record.session_id(), session.session_id());
    assert_eq!(record.started_at_ms(), h.clock.now_ms());
    assert_eq!(record.time_limit_seconds(), 1800);
    assert_eq!(record.problem_count(), 3);
}

#[tokio::test]
async fn provider_errors_surface_without_creating_a_session() {
    let h = harness(2, &[], RecordingSink::default());

    let err = h.engine.start_assessment("bad", &candidate()).await.err().unwrap();
    assert!(matches!(err, SessionError::Provider(ProviderError::InvalidAccessCode)));
    let err = h.engine.start_assessment("used", &candidate()).await.err().unwrap();
    assert!(matches!(err, SessionError::Provider(ProviderError::AlreadyStarted)));

    assert!(h.store.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_problem_set_is_refused() {
    let store = InMemorySessionStore::new();
    let h = harness_with(
        FakeProvider::new(30, Vec::new()),
        ScriptedJudge::default(),
        RecordingSink::default(),
        Arc::new(store.clone()),
        store,
    );

    let err = h.engine.start_practice(&candidate()).await.err().unwrap();
    assert!(matches!(err, SessionError::Empty));
    assert!(h.store.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn zero_time_limit_is_refused() {
    let store = InMemorySessionStore::new();
    let h = harness_with(
        FakeProvider::new(0, problems(2)),
        ScriptedJudge::default(),
        RecordingSink::default(),
        Arc::new(store.clone()),
        store,
    );

    let err = h.engine.start_practice(&candidate()).await.err().unwrap();
    assert!(matches!(err, SessionError::InvalidTimeLimit));
}

#[tokio::test]
async fn starting_discards_a_stale_session() {
    let h = harness(2, &[], RecordingSink::default());
    let stale = SessionRecord::new(
        SessionId::new("old"),
        SessionMode::Practice,
        problems(2),
        600,
        h.clock.now_ms(),
    )
    .unwrap();
    h.store.put_session(&stale).await.unwrap();
    h.store
        .put_draft(&SessionId::new("old"), 1, "leftover")
        .await
        .unwrap();

    let session = h.engine.start_practice(&candidate()).await.unwrap();

    let current = h.store.current_session().await.unwrap().unwrap();
    assert_eq!(current.session_id(), session.session_id());
    assert!(
        h.store
            .get_draft(&SessionId::new("old"), 1)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.store.draft_count().unwrap(), 0);
}

#[tokio::test]
async fn corrupt_record_is_treated_as_no_session() {
    let h = harness(2, &[], RecordingSink::default());
    h.store.put_raw_session("{\"session_id\": \"s-1\", \"mode\":").unwrap();
    h.store.put_draft(&SessionId::new("s-1"), 0, "unreachable").await.unwrap();

    assert!(h.engine.resume().await.unwrap().is_none());
    assert!(h.store.current_session().await.unwrap().is_none());
    assert_eq!(h.store.draft_count().unwrap(), 0);
}

#[tokio::test]
async fn resume_keeps_time_and_drafts() {
    let h = harness(3, &[], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "def solve(): pass").await.unwrap();
    let id = session.session_id().clone();
    drop(session);

    h.time.advance(chrono::Duration::seconds(90));
    let resumed = h.engine.resume().await.unwrap().expect("session resumed");

    assert_eq!(resumed.session_id(), &id);
    assert_eq!(resumed.remaining_seconds(), 30 * 60 - 90);
    assert_eq!(resumed.get_draft_code(0).await.unwrap(), "def solve(): pass");
}

#[tokio::test]
async fn resume_drops_leftovers_of_a_finalized_session() {
    let h = harness(2, &[], RecordingSink::default());
    let mut record = SessionRecord::new(
        SessionId::new("done"),
        SessionMode::Assessment,
        problems(2),
        600,
        h.clock.now_ms(),
    )
    .unwrap();
    record.mark_finalized();
    h.store.put_session(&record).await.unwrap();
    h.store.put_draft(&SessionId::new("done"), 0, "x").await.unwrap();

    assert!(h.engine.resume().await.unwrap().is_none());
    assert!(h.store.current_session().await.unwrap().is_none());
    assert_eq!(h.store.draft_count().unwrap(), 0);
    assert_eq!(h.sink.attempts(), 0);
}

#[tokio::test]
async fn resuming_a_running_session_hands_back_the_same_handle() {
    let h = harness(1, &[Outcome::Score(1, 1)], RecordingSink::default());
    let first = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    first.set_draft_code(0, "a").await.unwrap();

    let second = h.engine.clone().resume().await.unwrap().expect("session resumed");
    assert_eq!(second.session_id(), first.session_id());

    assert_eq!(first.submit().await.unwrap().score_percent(), 100);
    assert!(matches!(
        second.submit().await,
        Err(SessionError::NotActive {
            phase: SessionPhase::Finalized
        })
    ));
    assert_eq!(h.sink.attempts(), 1);
    assert_eq!(h.judge.evaluated().len(), 1);
}

#[tokio::test]
async fn second_engine_on_the_same_store_does_not_resubmit() {
    let h = harness(1, &[Outcome::Score(1, 1)], RecordingSink::default());
    let other_engine = SessionEngine::new(
        h.clock.clone(),
        Arc::new(h.store.clone()),
        Arc::new(FakeProvider::new(30, problems(1))),
        h.judge.clone(),
        h.sink.clone(),
    );
    let first = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    first.set_draft_code(0, "a").await.unwrap();
    let second = other_engine.resume().await.unwrap().expect("session resumed");

    first.submit().await.unwrap();
    let err = second.submit().await.unwrap_err();

    assert!(matches!(err, SessionError::NotActive { .. }));
    assert!(second.phase().is_terminal());
    assert_eq!(h.sink.attempts(), 1);
    assert_eq!(h.judge.evaluated().len(), 1);
    assert!(h.store.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn restart_after_sink_failure_waits_for_a_retry() {
    let h = harness(
        2,
        &[Outcome::Score(1, 1), Outcome::Score(0, 1)],
        RecordingSink::failing(1),
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();
    session.set_draft_code(1, "b").await.unwrap();
    assert!(session.submit().await.is_err());
    drop(session);

    let stored = h.store.current_session().await.unwrap().unwrap();
    assert_eq!(stored.pending_result().map(AggregateResult::score_percent), Some(50));

    let resumed = h.engine.resume().await.unwrap().expect("session resumed");
    assert_eq!(resumed.phase(), SessionPhase::Finalizing);
    assert!(resumed.awaiting_retry());
    assert!(matches!(
        resumed.set_draft_code(0, "changed").await,
        Err(SessionError::NotActive { .. })
    ));

    let result = resumed.submit().await.unwrap();
    assert_eq!(result.score_percent(), 50);
    assert_eq!(h.judge.evaluated().len(), 2);
    assert_eq!(h.sink.attempts(), 2);
    assert_eq!(resumed.phase(), SessionPhase::Finalized);
    assert!(h.store.current_session().await.unwrap().is_none());
    assert_eq!(h.store.draft_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_after_deadline_expires_synchronously() {
    let h = harness(
        2,
        &[Outcome::Score(1, 1), Outcome::Score(1, 1)],
        RecordingSink::default(),
    );
    let started = h.clock.now_ms() - 2 * 60 * 60 * 1000;
    let record = SessionRecord::new(
        SessionId::new("late"),
        SessionMode::Assessment,
        problems(2),
        60,
        started,
    )
    .unwrap();
    h.store.put_session(&record).await.unwrap();
    h.store.put_draft(&SessionId::new("late"), 0, "a").await.unwrap();

    let session = h.engine.resume().await.unwrap().expect("session resumed");

    assert_eq!(h.observer.expired.load(Ordering::SeqCst), 1);
    assert_eq!(h.observer.ticks.load(Ordering::SeqCst), 0);
    assert_eq!(session.remaining_seconds(), 0);

    assert_eq!(session.settled().await, SessionPhase::Finalized);
    assert_eq!(h.sink.attempts.lock().unwrap()[0].2, 50);
    assert_eq!(h.sink.attempts(), 1);
    assert_eq!(h.observer.ticks.load(Ordering::SeqCst), 0);
    assert!(h.store.current_session().await.unwrap().is_none());
}

//
// ─── NAVIGATION AND DRAFTS ─────────────────────────────────────────────────────
//

#[tokio::test]
async fn drafts_survive_navigation() {
    let h = harness(3, &[], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();

    session.set_draft_code(0, "X").await.unwrap();
    session.set_draft_code(2, "Z").await.unwrap();
    session.go_to_problem(1).await.unwrap();
    assert_eq!(session.get_draft_code(1).await.unwrap(), "");
    session.go_to_problem(0).await.unwrap();

    assert_eq!(session.get_draft_code(0).await.unwrap(), "X");
    assert_eq!(session.get_draft_code(2).await.unwrap(), "Z");
    assert_eq!(session.next_problem().await.unwrap(), 1);
    assert_eq!(session.previous_problem().await.unwrap(), 0);
    assert!(matches!(
        session.previous_problem().await,
        Err(SessionError::InvalidProblemIndex { index: 0, count: 3 })
    ));
    assert!(matches!(
        session.go_to_problem(3).await,
        Err(SessionError::InvalidProblemIndex { index: 3, count: 3 })
    ));
}

#[tokio::test]
async fn navigation_leaves_the_countdown_alone() {
    let h = harness(2, &[], RecordingSink::default());
    let session = h.engine.start_practice(&candidate()).await.unwrap();
    h.time.advance(chrono::Duration::seconds(5));
    let before = session.remaining_seconds();

    session.go_to_problem(1).await.unwrap();
    session.go_to_problem(0).await.unwrap();

    assert_eq!(session.remaining_seconds(), before);
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn run_does_not_save_or_score() {
    let h = harness(2, &[], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();

    let verdict = session.run_current("print(1)", Language::Python3).await.unwrap();

    assert_eq!(verdict.output(), Some("ran 8 bytes"));
    assert_eq!(h.judge.runs.load(Ordering::SeqCst), 1);
    assert!(h.judge.evaluated().is_empty());
    assert!(
        h.store
            .get_draft(session.session_id(), 0)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn check_is_practice_only() {
    let h = harness(2, &[Outcome::Score(3, 3)], RecordingSink::default());

    let practice = h.engine.start_practice(&candidate()).await.unwrap();
    let verdict = practice.check_current("answer").await.unwrap();
    assert!(verdict.is_full_pass());
    assert_eq!(practice.get_draft_code(0).await.unwrap(), "answer");
    assert_eq!(practice.phase(), SessionPhase::Active);
    assert_eq!(h.sink.attempts(), 0);

    let assessment = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    let err = assessment.check_current("answer").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::ModeMismatch {
            mode: SessionMode::Assessment
        }
    ));
}

#[tokio::test]
async fn chosen_language_is_persisted_and_used_for_grading() {
    let h = harness(1, &[Outcome::Score(1, 1)], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();

    session.set_language(Language::Java).await.unwrap();
    session.set_draft_code(0, "class Solution {}").await.unwrap();
    let stored = h.store.current_session().await.unwrap().unwrap();
    assert_eq!(stored.language(), Language::Java);

    session.submit().await.unwrap();
    assert_eq!(h.judge.evaluated()[0].2, Language::Java);
}

//
// ─── FINALIZE ──────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn score_counts_full_passes_only() {
    let h = harness(
        3,
        &[Outcome::Score(2, 2), Outcome::Score(1, 3), Outcome::Score(0, 0)],
        RecordingSink::default(),
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    for i in 0..3 {
        session.set_draft_code(i, &format!("code {i}")).await.unwrap();
    }

    let result = session.submit().await.unwrap();

    assert_eq!(result.score_percent(), 33);
    let titles: Vec<_> = result
        .per_problem()
        .iter()
        .map(|p| p.problem_title.as_str())
        .collect();
    assert_eq!(titles, ["P0", "P1", "P2"]);
    assert!(!result.per_problem()[2].passed);

    let order: Vec<_> = h.judge.evaluated().into_iter().map(|(id, _, _)| id).collect();
    assert_eq!(order, [100, 101, 102]);

    let attempts = h.sink.attempts.lock().unwrap().clone();
    assert_eq!(
        attempts,
        [(session.session_id().clone(), SessionMode::Assessment, 33)]
    );
    assert_eq!(session.phase(), SessionPhase::Finalized);
    assert_eq!(*h.observer.finalized.lock().unwrap(), [33]);
    assert!(h.store.current_session().await.unwrap().is_none());
    assert_eq!(h.store.draft_count().unwrap(), 0);
}

#[tokio::test]
async fn unavailable_judge_fails_only_that_problem() {
    let h = harness(
        3,
        &[Outcome::Score(2, 2), Outcome::Unavailable, Outcome::Score(4, 4)],
        RecordingSink::default(),
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    for i in 0..3 {
        session.set_draft_code(i, "solution").await.unwrap();
    }

    let result = session.submit().await.unwrap();

    assert_eq!(result.score_percent(), 67);
    assert!(!result.per_problem()[1].passed);
    assert_eq!(result.per_problem()[1].total_tests, 0);
    assert_eq!(h.judge.evaluated().len(), 3);
    assert_eq!(session.phase(), SessionPhase::Finalized);
}

#[tokio::test]
async fn missing_drafts_fail_without_judging() {
    let h = harness(3, &[Outcome::Score(1, 1)], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "solution").await.unwrap();
    session.set_draft_code(2, "   ").await.unwrap();

    let result = session.submit().await.unwrap();

    assert_eq!(h.judge.evaluated().len(), 1);
    assert_eq!(result.score_percent(), 33);
    assert_eq!(result.per_problem()[1].passed_tests, 0);
    assert_eq!(result.per_problem()[1].total_tests, 0);
}

#[tokio::test]
async fn current_and_saved_drafts_are_graded_in_order() {
    let h = harness(2, &[Outcome::Score(1, 1), Outcome::Score(1, 1)], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "first").await.unwrap();
    session.go_to_problem(1).await.unwrap();
    session.set_draft_code(1, "second").await.unwrap();

    let result = session.submit().await.unwrap();

    assert_eq!(result.score_percent(), 100);
    let codes: Vec<_> = h.judge.evaluated().into_iter().map(|(_, code, _)| code).collect();
    assert_eq!(codes, ["first", "second"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_finalize_calls_submit_once() {
    let judge = ScriptedJudge {
        delay: Some(Duration::from_millis(20)),
        ..ScriptedJudge::with(&[Outcome::Score(1, 1), Outcome::Score(1, 1)])
    };
    let store = InMemorySessionStore::new();
    let h = harness_with(
        FakeProvider::new(30, problems(2)),
        judge,
        RecordingSink::default(),
        Arc::new(store.clone()),
        store,
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();
    session.set_draft_code(1, "b").await.unwrap();

    let manual = {
        let session = session.clone();
        tokio::spawn(async move { session.finalize(FinalizeTrigger::Manual).await })
    };
    let expiry = {
        let session = session.clone();
        tokio::spawn(async move { session.finalize(FinalizeTrigger::Expiry).await })
    };
    let manual = manual.await.unwrap().unwrap();
    let expiry = expiry.await.unwrap().unwrap();

    assert_eq!(usize::from(manual.is_some()) + usize::from(expiry.is_some()), 1);
    assert_eq!(session.settled().await, SessionPhase::Finalized);
    assert_eq!(h.sink.attempts(), 1);
    assert_eq!(h.judge.evaluated().len(), 2);
    assert!(matches!(
        session.submit().await,
        Err(SessionError::NotActive {
            phase: SessionPhase::Finalized
        })
    ));
}

#[tokio::test]
async fn sink_failure_keeps_session_retryable() {
    let h = harness(
        2,
        &[Outcome::Score(1, 1), Outcome::Score(0, 1)],
        RecordingSink::failing(1),
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();
    session.set_draft_code(1, "b").await.unwrap();

    let err = session.submit().await.unwrap_err();
    assert!(matches!(err, SessionError::Sink(_)));
    assert!(err.is_retryable());
    assert_eq!(session.phase(), SessionPhase::Finalizing);
    assert!(session.awaiting_retry());
    assert!(h.store.current_session().await.unwrap().is_some());
    assert!(matches!(
        session.go_to_problem(1).await,
        Err(SessionError::NotActive { .. })
    ));

    let result = session.submit().await.unwrap();
    assert_eq!(result.score_percent(), 50);
    assert_eq!(h.sink.attempts(), 2);
    assert_eq!(h.judge.evaluated().len(), 2);
    assert_eq!(session.phase(), SessionPhase::Finalized);
    assert!(h.store.current_session().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expiry_finalizes_exactly_once() {
    let h = harness(2, &[Outcome::Score(1, 1)], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();

    h.time.advance(chrono::Duration::minutes(31));
    let phase = tokio::time::timeout(Duration::from_secs(5), session.settled())
        .await
        .expect("expiry finalized the session");

    assert_eq!(phase, SessionPhase::Finalized);
    for _ in 0..3 {
        assert_eq!(session.remaining_seconds(), 0);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.observer.expired.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.attempts(), 1);
    assert_eq!(*h.observer.finalized.lock().unwrap(), [50]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expiry_waits_for_an_in_flight_draft_flush() {
    let backing = InMemorySessionStore::new();
    let store = Arc::new(SlowDraftStore {
        inner: backing.clone(),
        delay: Duration::from_millis(60),
    });
    let h = harness_with(
        FakeProvider::new(30, problems(2)),
        ScriptedJudge::with(&[Outcome::Score(1, 1), Outcome::Score(1, 1)]),
        RecordingSink::default(),
        store,
        backing,
    );
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "zero").await.unwrap();
    session.set_draft_code(1, "one").await.unwrap();

    let navigation = {
        let session = session.clone();
        tokio::spawn(async move { session.go_to_problem(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.time.advance(chrono::Duration::minutes(31));

    navigation.await.unwrap().unwrap();
    let phase = tokio::time::timeout(Duration::from_secs(5), session.settled())
        .await
        .expect("expiry finalized the session");

    assert_eq!(phase, SessionPhase::Finalized);
    let codes: Vec<_> = h.judge.evaluated().into_iter().map(|(_, code, _)| code).collect();
    assert_eq!(codes, ["zero", "one"]);
    assert_eq!(h.sink.attempts.lock().unwrap()[0].2, 100);
}

//
// ─── EXIT ──────────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn exit_never_judges_or_submits() {
    let h = harness(2, &[Outcome::Score(1, 1)], RecordingSink::default());
    let session = h.engine.start_assessment("ABC123", &candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();
    session.set_draft_code(1, "b").await.unwrap();

    session.exit().await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Aborted);
    assert!(h.judge.evaluated().is_empty());
    assert_eq!(h.judge.runs.load(Ordering::SeqCst), 0);
    assert_eq!(h.sink.attempts(), 0);
    assert_eq!(h.observer.aborted.load(Ordering::SeqCst), 1);
    assert!(h.store.current_session().await.unwrap().is_none());
    assert_eq!(h.store.draft_count().unwrap(), 0);

    assert!(matches!(
        session.submit().await,
        Err(SessionError::NotActive {
            phase: SessionPhase::Aborted
        })
    ));
    assert!(session.exit().await.is_err());
}

#[tokio::test]
async fn exit_is_allowed_while_waiting_for_a_retry() {
    let h = harness(1, &[Outcome::Score(1, 1)], RecordingSink::failing(5));
    let session = h.engine.start_practice(&candidate()).await.unwrap();
    session.set_draft_code(0, "a").await.unwrap();

    assert!(session.submit().await.is_err());
    session.exit().await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Aborted);
    assert_eq!(h.sink.attempts(), 1);
    assert!(h.store.current_session().await.unwrap().is_none());
}
