/// Outcome of one relay cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayCycle {
    /// Rows selected from the outbox.
    pub fetched: usize,
    /// Rows published and marked `Published`.
    pub published: usize,
    /// Rows whose publish failed and were marked `Failed`.
    pub failed: usize,
}

impl RelayCycle {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

/// Cumulative statistics of a relay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// Completed cycles, including empty ones.
    pub cycles: usize,
    pub published: usize,
    pub failed: usize,
    /// Cycles that ended in an error (store unavailable, commit failure).
    pub errors: usize,
}

impl RelayStats {
    pub(crate) fn record(&mut self, cycle: &RelayCycle) {
        self.cycles += 1;
        self.published += cycle.published;
        self.failed += cycle.failed;
    }
}
