use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerdictError {
    #[error("passed tests ({passed}) exceed total tests ({total})")]
    PassedExceedsTotal { passed: u32, total: u32 },
}

/// Outcome of a single hidden or sample test case, when the judge reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestCaseResult {
    pub passed: bool,
    pub input: Option<String>,
    pub expected_output: Option<String>,
    pub actual_output: Option<String>,
    pub error: Option<String>,
}

/// Result of one judge invocation.
///
/// Code that fails to compile or crashes is still a verdict: `error` is set
/// and it simply does not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    passed_tests: u32,
    total_tests: u32,
    output: Option<String>,
    error: Option<String>,
    test_cases: Vec<TestCaseResult>,
}

impl Verdict {
    /// # Errors
    ///
    /// Returns `VerdictError::PassedExceedsTotal` if `passed_tests > total_tests`.
    pub fn new(passed_tests: u32, total_tests: u32) -> Result<Self, VerdictError> {
        if passed_tests > total_tests {
            return Err(VerdictError::PassedExceedsTotal {
                passed: passed_tests,
                total: total_tests,
            });
        }
        Ok(Self {
            passed_tests,
            total_tests,
            output: None,
            error: None,
            test_cases: Vec::new(),
        })
    }

    /// A verdict for code that failed to compile or run.
    #[must_use]
    pub fn errored(total_tests: u32, error: impl Into<String>) -> Self {
        Self {
            passed_tests: 0,
            total_tests,
            output: None,
            error: Some(error.into()),
            test_cases: Vec::new(),
        }
    }

    /// A run-only verdict carrying program output and no graded tests.
    #[must_use]
    pub fn output_only(output: impl Into<String>) -> Self {
        Self {
            passed_tests: 0,
            total_tests: 0,
            output: Some(output.into()),
            error: None,
            test_cases: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_test_cases(mut self, test_cases: Vec<TestCaseResult>) -> Self {
        self.test_cases = test_cases;
        self
    }

    #[must_use]
    pub fn passed_tests(&self) -> u32 {
        self.passed_tests
    }

    #[must_use]
    pub fn total_tests(&self) -> u32 {
        self.total_tests
    }

    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn test_cases(&self) -> &[TestCaseResult] {
        &self.test_cases
    }

    /// All tests passed and there was at least one test.
    #[must_use]
    pub fn is_full_pass(&self) -> bool {
        self.total_tests > 0 && self.passed_tests == self.total_tests
    }
}
