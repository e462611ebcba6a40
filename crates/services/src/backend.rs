//! REST client for the assessment backend.
//!
//! One client serves as session provider, judge and submission sink.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use assess_core::model::{
    CandidateId, Difficulty, Language, ProblemId, SessionId, SessionMode, SessionProblem,
    TestCaseResult, Verdict,
};

use crate::error::{
    BackendConfigError, BackendError, JudgeUnavailable, ProviderError, SinkError,
};
use crate::judge::JudgeClient;
use crate::provider::{SessionGrant, SessionProvider};
use crate::sink::SubmissionSink;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reads `ASSESS_API_BASE_URL`, `ASSESS_API_TOKEN` and
    /// `ASSESS_HTTP_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError::InvalidValue` for a malformed timeout.
    pub fn from_env() -> Result<Self, BackendConfigError> {
        let base_url = env::var("ASSESS_API_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let token = env::var("ASSESS_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        let timeout = match env::var("ASSESS_HTTP_TIMEOUT_SECS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs = raw.trim().parse::<u64>().ok().filter(|secs| *secs > 0).ok_or(
                    BackendConfigError::InvalidValue {
                        name: "ASSESS_HTTP_TIMEOUT_SECS",
                        value: raw.clone(),
                    },
                )?;
                Duration::from_secs(secs)
            }
            _ => DEFAULT_TIMEOUT,
        };
        Ok(Self {
            base_url,
            token,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    config: BackendConfig,
}

impl BackendClient {
    /// # Errors
    ///
    /// Returns `BackendConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// # Errors
    ///
    /// Returns `BackendConfigError` for invalid environment values.
    pub fn from_env() -> Result<Self, BackendConfigError> {
        Self::new(BackendConfig::from_env()?)
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(self.config.endpoint(path));
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response, BackendError> {
        let response = self.post(path).json(body).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }
        Ok(response)
    }

    async fn send_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        Ok(self.send(path, body).await?.json().await?)
    }

    async fn submission(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
        run_only: bool,
    ) -> Result<Verdict, JudgeUnavailable> {
        let request = SubmissionRequest {
            problem_id: problem_id.value(),
            code,
            language: language.as_str(),
            run_only,
        };
        let response: SubmissionResponse = self
            .send_json("candidate/submissions", &request)
            .await
            .map_err(|err| JudgeUnavailable(err.to_string()))?;
        response.into_verdict()
    }
}

#[async_trait]
impl SessionProvider for BackendClient {
    async fn start_assessment(
        &self,
        access_code: &str,
        candidate: &CandidateId,
    ) -> Result<SessionGrant, ProviderError> {
        let request = StartRequest {
            access_code: Some(access_code),
            candidate_email: candidate.as_str(),
        };
        match self.send_json::<_, StartResponse>("assessment/start", &request).await {
            Ok(body) => Ok(body.into_grant()),
            Err(BackendError::HttpStatus(StatusCode::NOT_FOUND)) => {
                Err(ProviderError::InvalidAccessCode)
            }
            Err(BackendError::HttpStatus(StatusCode::BAD_REQUEST)) => {
                Err(ProviderError::AlreadyStarted)
            }
            Err(err) => Err(ProviderError::Unavailable(err.to_string())),
        }
    }

    async fn start_practice(&self, candidate: &CandidateId) -> Result<SessionGrant, ProviderError> {
        let request = StartRequest {
            access_code: None,
            candidate_email: candidate.as_str(),
        };
        self.send_json::<_, StartResponse>("assessment/practice/start", &request)
            .await
            .map(StartResponse::into_grant)
            .map_err(|err| ProviderError::Unavailable(err.to_string()))
    }
}

#[async_trait]
impl JudgeClient for BackendClient {
    async fn run(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
    ) -> Result<Verdict, JudgeUnavailable> {
        self.submission(problem_id, code, language, true).await
    }

    async fn evaluate(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: Language,
    ) -> Result<Verdict, JudgeUnavailable> {
        self.submission(problem_id, code, language, false).await
    }
}

#[async_trait]
impl SubmissionSink for BackendClient {
    async fn submit_score(
        &self,
        session_id: &SessionId,
        mode: SessionMode,
        score_percent: u8,
    ) -> Result<(), SinkError> {
        let path = match mode {
            SessionMode::Assessment => "assessment/submit",
            SessionMode::Practice => "assessment/practice/submit",
        };
        let request = SubmitScoreRequest {
            session_id: WireSessionId::from(session_id),
            score: score_percent,
        };
        self.send(path, &request)
            .await
            .map(|_| ())
            .map_err(|err| SinkError(err.to_string()))
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_code: Option<&'a str>,
    candidate_email: &'a str,
}

/// Session ids are numeric on the wire but opaque to the engine.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireSessionId {
    Number(i64),
    Text(String),
}

impl From<&SessionId> for WireSessionId {
    fn from(id: &SessionId) -> Self {
        match id.as_str().parse::<i64>() {
            Ok(number) => WireSessionId::Number(number),
            Err(_) => WireSessionId::Text(id.as_str().to_owned()),
        }
    }
}

impl From<WireSessionId> for SessionId {
    fn from(id: WireSessionId) -> Self {
        match id {
            WireSessionId::Number(number) => SessionId::new(number.to_string()),
            WireSessionId::Text(text) => SessionId::new(text),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: WireSessionId,
    /// Minutes.
    time_limit: u32,
    #[serde(default)]
    problems: Vec<WireProblem>,
}

impl StartResponse {
    fn into_grant(self) -> SessionGrant {
        SessionGrant {
            session_id: self.session_id.into(),
            time_limit_minutes: self.time_limit,
            problems: self
                .problems
                .into_iter()
                .map(WireProblem::into_problem)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireProblem {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    difficulty: Option<Difficulty>,
}

impl WireProblem {
    fn into_problem(self) -> SessionProblem {
        let problem = SessionProblem::new(ProblemId::new(self.id), self.title);
        match self.difficulty {
            Some(difficulty) => problem.with_difficulty(difficulty),
            None => problem,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionRequest<'a> {
    problem_id: u64,
    code: &'a str,
    language: &'a str,
    run_only: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SubmissionResponse {
    passed_tests: u32,
    total_tests: u32,
    output: Option<String>,
    error: Option<String>,
    test_case_results: Vec<WireTestCase>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireTestCase {
    passed: bool,
    input: Option<String>,
    expected_output: Option<String>,
    actual_output: Option<String>,
    error: Option<String>,
}

/// Execution failures are reported in the output as `Error: <message>`.
const OUTPUT_ERROR_PREFIX: &str = "Error: ";

impl SubmissionResponse {
    fn into_verdict(self) -> Result<Verdict, JudgeUnavailable> {
        let mut verdict = Verdict::new(self.passed_tests, self.total_tests)
            .map_err(|err| JudgeUnavailable(format!("malformed verdict: {err}")))?;

        let error = self
            .error
            .or_else(|| {
                self.test_case_results
                    .iter()
                    .find_map(|case| case.error.clone())
            })
            .or_else(|| {
                self.output
                    .as_deref()
                    .and_then(|out| out.strip_prefix(OUTPUT_ERROR_PREFIX))
                    .map(str::to_owned)
            });

        if let Some(output) = self.output {
            verdict = verdict.with_output(output);
        }
        if let Some(error) = error {
            verdict = verdict.with_error(error);
        }
        let cases = self
            .test_case_results
            .into_iter()
            .map(|case| TestCaseResult {
                passed: case.passed,
                input: case.input,
                expected_output: case.expected_output,
                actual_output: case.actual_output,
                error: case.error,
            })
            .collect();
        Ok(verdict.with_test_cases(cases))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitScoreRequest {
    session_id: WireSessionId,
    score: u8,
}
