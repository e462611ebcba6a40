use super::lifecycle::SessionPhase;

/// Snapshot of a running session, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub current_index: usize,
    pub total_problems: usize,
    pub remaining_seconds: u64,
    pub phase: SessionPhase,
}

impl SessionProgress {
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.current_index == 0
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.current_index + 1 >= self.total_problems
    }
}
