use qa_queue::QueueError;
use thiserror::Error;

use crate::completion::CompletionError;
use crate::delivery::DeliveryError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Queue(#[from] QueueError),

    #[error("Malformed message body: {0}")]
    Parse(String),

    #[error("Question {question_id} has no content")]
    Validation { question_id: String },

    #[error("Completion failed: {0}")]
    Processing(#[from] CompletionError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl WorkerError {
    /// Only completion failures are retried through redelivery.
    /// Malformed and empty messages are dropped; delivery failures degrade to
    /// the fallback queue; broker errors restart the consume session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Processing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_processing_errors_are_retryable() {
        assert!(WorkerError::Processing(CompletionError::EmptyResponse).is_retryable());
        assert!(!WorkerError::Parse("eof".into()).is_retryable());
        assert!(!WorkerError::Validation {
            question_id: "q".into()
        }
        .is_retryable());
        assert!(!WorkerError::Queue(QueueError::QueueMissing { queue: "q".into() }).is_retryable());
    }
}
