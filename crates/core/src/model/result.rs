use serde::{Deserialize, Serialize};

use crate::model::Verdict;

/// Per-problem line of the final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemResult {
    pub problem_title: String,
    pub passed: bool,
    pub passed_tests: u32,
    pub total_tests: u32,
}

impl ProblemResult {
    #[must_use]
    pub fn from_verdict(problem_title: impl Into<String>, verdict: &Verdict) -> Self {
        Self {
            problem_title: problem_title.into(),
            passed: verdict.is_full_pass(),
            passed_tests: verdict.passed_tests(),
            total_tests: verdict.total_tests(),
        }
    }

    /// A problem that was never judged (no draft, or the judge was unreachable).
    #[must_use]
    pub fn failed(problem_title: impl Into<String>) -> Self {
        Self {
            problem_title: problem_title.into(),
            passed: false,
            passed_tests: 0,
            total_tests: 0,
        }
    }
}

/// Score of a whole session, produced once per finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    score_percent: u8,
    per_problem: Vec<ProblemResult>,
}

impl AggregateResult {
    /// Build the aggregate from per-problem results in presentation order.
    ///
    /// Each problem counts all-or-nothing. An empty list scores 0.
    #[must_use]
    pub fn from_problem_results(per_problem: Vec<ProblemResult>) -> Self {
        let passed = per_problem.iter().filter(|p| p.passed).count();
        let score_percent = score_percent(passed, per_problem.len());
        Self {
            score_percent,
            per_problem,
        }
    }

    #[must_use]
    pub fn score_percent(&self) -> u8 {
        self.score_percent
    }

    #[must_use]
    pub fn per_problem(&self) -> &[ProblemResult] {
        &self.per_problem
    }

    #[must_use]
    pub fn total_problems(&self) -> usize {
        self.per_problem.len()
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.per_problem.iter().filter(|p| p.passed).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.total_problems() - self.passed_count()
    }
}

/// `round(100 * passed / total)` with halves rounded up, in integers.
#[must_use]
pub fn score_percent(passed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let passed = passed.min(total) as u128;
    let total = total as u128;
    let rounded = (200 * passed + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}
