use crate::DiffCounts;

/// This many consecutive passes that applied nothing and saw identical diff
/// counts means the loop is spinning without headway.
pub const DEFAULT_STALL_LIMIT: usize = 4;

/// Watches per-pass diff totals and applied changes, and reports when both
/// stop moving.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    stall_limit: usize,
    last: Option<DiffCounts>,
    repeats: usize,
}

impl ProgressTracker {
    pub fn new(stall_limit: usize) -> Self {
        Self {
            stall_limit: stall_limit.max(1),
            last: None,
            repeats: 0,
        }
    }

    /// Record one pass: its pre-apply diff counts and how many changes went
    /// through. Returns true once `stall_limit` passes in a row applied
    /// nothing against the same non-empty counts.
    pub fn observe(&mut self, counts: DiffCounts, applied: usize) -> bool {
        if counts.is_empty() {
            self.last = None;
            self.repeats = 0;
            return false;
        }
        if applied > 0 {
            self.last = Some(counts);
            self.repeats = 0;
            return false;
        }
        if self.last == Some(counts) {
            self.repeats += 1;
        } else {
            self.last = Some(counts);
            self.repeats = 1;
        }
        self.repeats >= self.stall_limit
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_LIMIT)
    }
}
