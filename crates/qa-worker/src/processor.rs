//! Per-message processing.
//!
//! `MessageProcessor::process` takes one consumed message through parsing,
//! validation, completion and delivery and returns the outcome. The consumer
//! settles the delivery with `outcome.disposition()`.

use std::sync::Arc;
use std::time::Instant;

use qa_common::{Disposition, IncomingMessage, Question};
use qa_queue::QueuePublisher;
use tracing::{error, info, warn};

use crate::completion::{Completer, CompletionError};
use crate::delivery::{DeliveryOutcome, DeliveryRouter};
use crate::error::WorkerError;
use crate::intake;
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy};

/// Terminal state of one processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Answer posted into the conversation
    Delivered,
    /// Answer published to the response queue
    FallbackPublished,
    /// Body was not JSON
    DroppedMalformed,
    /// Nothing to answer
    DroppedEmpty,
    /// Completion failed, a copy with this counter was republished
    Requeued { retry_count: u32 },
    /// Completion failed with retries exhausted
    DeadLettered,
    /// Completion failed and the retry copy could not be published.
    /// `requeue` is false once the broker has already redelivered the
    /// message, so a persistently failing publish ends in dead-lettering.
    RetryPublishFailed { requeue: bool },
    /// Answer produced but the fallback publish failed, `requeue` as above
    FallbackFailed { requeue: bool },
}

impl ProcessingOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            ProcessingOutcome::Delivered
            | ProcessingOutcome::FallbackPublished
            | ProcessingOutcome::DroppedMalformed
            | ProcessingOutcome::DroppedEmpty => Disposition::Ack,
            ProcessingOutcome::Requeued { .. } | ProcessingOutcome::DeadLettered => {
                Disposition::Reject { requeue: false }
            }
            ProcessingOutcome::RetryPublishFailed { requeue }
            | ProcessingOutcome::FallbackFailed { requeue } => Disposition::Reject {
                requeue: *requeue,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingOutcome::Delivered => "delivered",
            ProcessingOutcome::FallbackPublished => "fallback_published",
            ProcessingOutcome::DroppedMalformed => "dropped_malformed",
            ProcessingOutcome::DroppedEmpty => "dropped_empty",
            ProcessingOutcome::Requeued { .. } => "requeued",
            ProcessingOutcome::DeadLettered => "dead_lettered",
            ProcessingOutcome::RetryPublishFailed { .. } => "retry_publish_failed",
            ProcessingOutcome::FallbackFailed { .. } => "fallback_failed",
        }
    }
}

pub struct MessageProcessor {
    completer: Arc<dyn Completer>,
    router: DeliveryRouter,
    publisher: Arc<dyn QueuePublisher>,
    policy: RetryPolicy,
}

impl MessageProcessor {
    pub fn new(
        completer: Arc<dyn Completer>,
        router: DeliveryRouter,
        publisher: Arc<dyn QueuePublisher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            completer,
            router,
            publisher,
            policy,
        }
    }

    pub async fn process(&self, message: &IncomingMessage) -> ProcessingOutcome {
        let outcome = match Self::admit(&message.body) {
            Ok(question) => self.answer(message, &question).await,
            Err(e) => Self::drop_message(message, e),
        };

        metrics::record_outcome(&outcome);
        outcome
    }

    fn admit(body: &[u8]) -> Result<Question, WorkerError> {
        intake::validate(intake::parse_question(body)?)
    }

    fn drop_message(message: &IncomingMessage, err: WorkerError) -> ProcessingOutcome {
        match err {
            WorkerError::Validation { question_id } => {
                warn!(
                    question_id = %question_id,
                    delivery_tag = message.delivery_tag,
                    "Dropping question without content"
                );
                ProcessingOutcome::DroppedEmpty
            }
            other => {
                error!(
                    delivery_tag = message.delivery_tag,
                    queue = %message.source_queue,
                    error = %other,
                    "Dropping malformed message"
                );
                ProcessingOutcome::DroppedMalformed
            }
        }
    }

    async fn answer(&self, message: &IncomingMessage, question: &Question) -> ProcessingOutcome {
        info!(
            question_id = %question.question_id,
            retry_count = message.retry_count,
            redelivered = message.redelivered,
            "Processing question"
        );

        let started = Instant::now();
        let completion = self.completer.complete(&question.content).await;
        metrics::record_completion_duration(started.elapsed(), completion.is_ok());

        match completion {
            Ok(answer) => self.deliver(message, question, &answer).await,
            Err(e) => self.on_failure(message, question, e).await,
        }
    }

    async fn deliver(
        &self,
        message: &IncomingMessage,
        question: &Question,
        answer: &str,
    ) -> ProcessingOutcome {
        match self.router.route(question, answer).await {
            Ok(DeliveryOutcome::Delivered) => ProcessingOutcome::Delivered,
            Ok(DeliveryOutcome::FallbackPublished { reason }) => {
                info!(
                    question_id = %question.question_id,
                    reason = %reason,
                    "Answer published to response queue"
                );
                ProcessingOutcome::FallbackPublished
            }
            Err(e) => {
                let requeue = !message.redelivered;
                error!(
                    question_id = %question.question_id,
                    requeue = requeue,
                    error = %e,
                    "Answer could not be delivered or published"
                );
                ProcessingOutcome::FallbackFailed { requeue }
            }
        }
    }

    async fn on_failure(
        &self,
        message: &IncomingMessage,
        question: &Question,
        err: CompletionError,
    ) -> ProcessingOutcome {
        match self.policy.decide(message.retry_count) {
            RetryDecision::Retry { next_retry_count } => {
                let envelope = message.redelivery(next_retry_count);
                match self.publisher.publish(&message.source_queue, &envelope).await {
                    Ok(()) => {
                        warn!(
                            question_id = %question.question_id,
                            retry_count = next_retry_count,
                            max_retries = self.policy.max_retries,
                            error = %err,
                            "Completion failed, question requeued"
                        );
                        ProcessingOutcome::Requeued {
                            retry_count: next_retry_count,
                        }
                    }
                    Err(publish_err) => {
                        let requeue = !message.redelivered;
                        error!(
                            question_id = %question.question_id,
                            requeue = requeue,
                            error = %publish_err,
                            "Failed to republish question for retry"
                        );
                        ProcessingOutcome::RetryPublishFailed { requeue }
                    }
                }
            }
            RetryDecision::DeadLetter => {
                error!(
                    question_id = %question.question_id,
                    retry_count = message.retry_count,
                    error = %err,
                    "Retries exhausted, dead-lettering question"
                );
                ProcessingOutcome::DeadLettered
            }
        }
    }
}
