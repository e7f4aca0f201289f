/// One unit of work: a username tracked through its retry/outcome lifecycle.
///
/// Mutated only by the dispatcher between rounds; workers never see it.
#[derive(Debug, Clone)]
pub struct Target {
    username: String,
    attempts: u32,
    retries_left: u32,
}

impl Target {
    pub fn new(username: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            username: username.into(),
            attempts: 0,
            retries_left: retry_budget,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Called by the dispatcher on every dispatch, including the first.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Consumes one unit of retry budget. Callers must check
    /// [`Target::retries_left`] first; this saturates rather than underflows.
    pub fn consume_retry(&mut self) {
        self.retries_left = self.retries_left.saturating_sub(1);
    }
}
