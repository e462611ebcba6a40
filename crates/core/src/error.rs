use thiserror::Error;

use crate::model::{SessionRecordError, VerdictError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    SessionRecord(#[from] SessionRecordError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
}
