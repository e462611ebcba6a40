mod ids;
mod language;
mod result;
mod session;
mod verdict;

pub use ids::{CandidateId, ParseIdError, ProblemId, SessionId};
pub use language::{Language, UnknownLanguage};
pub use result::{AggregateResult, ProblemResult, score_percent};
pub use session::{Difficulty, SessionMode, SessionProblem, SessionRecord, SessionRecordError};
pub use verdict::{TestCaseResult, Verdict, VerdictError};
