//! Bounded redelivery for failed completions

/// What to do with a message whose completion failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish with the incremented counter
    Retry { next_retry_count: u32 },
    /// Reject without requeue and let the broker dead-letter it
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Retry {
                next_retry_count: retry_count.saturating_add(1),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}
