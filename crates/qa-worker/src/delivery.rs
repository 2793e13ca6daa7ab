//! Answer delivery
//!
//! Addressed questions are answered by posting into the conversation service
//! as the bot user. When that is not possible the answer goes to the response
//! queue instead, so a failed direct delivery never loses the answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use qa_common::{FallbackResponse, Question, QueueEnvelope, Recipient, ThreadMessage};
use qa_config::DeliveryConfig;
use qa_queue::{QueueError, QueuePublisher};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Conversation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Direct delivery is not configured")]
    NotConfigured,

    #[error("Fallback publish failed: {0}")]
    Fallback(#[from] QueueError),
}

/// Where an answer ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    FallbackPublished { reason: String },
}

// ============================================================================
// Direct delivery
// ============================================================================

/// HTTP client for `POST /threads/{thread_id}/messages`
#[derive(Clone)]
pub struct DirectDeliveryClient {
    client: reqwest::Client,
    base_url: String,
    bot_user_id: Uuid,
}

impl DirectDeliveryClient {
    pub fn new(
        base_url: impl Into<String>,
        bot_user_id: Uuid,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_user_id,
        })
    }

    /// `None` while the bot identity is still the nil UUID
    pub fn from_config(config: &DeliveryConfig) -> Result<Option<Self>, DeliveryError> {
        if config.bot_user_id.is_nil() {
            warn!("BOT_USER_ID is not set, answers will only be published to the response queue");
            return Ok(None);
        }
        Self::new(&config.base_url, config.bot_user_id, config.timeout()).map(Some)
    }

    fn thread_messages_url(&self, thread_id: &str) -> String {
        format!(
            "{}/threads/{}/messages",
            self.base_url,
            urlencoding::encode(thread_id)
        )
    }

    /// Any 2xx counts as delivered
    pub async fn post(&self, recipient: Recipient<'_>, answer: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.thread_messages_url(recipient.thread_id))
            .header("X-User-Id", self.bot_user_id.to_string())
            .json(&ThreadMessage::text(answer))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

// ============================================================================
// Router
// ============================================================================

pub struct DeliveryRouter {
    direct: Option<DirectDeliveryClient>,
    publisher: Arc<dyn QueuePublisher>,
    response_queue: String,
    processed_by: String,
}

impl DeliveryRouter {
    pub fn new(
        direct: Option<DirectDeliveryClient>,
        publisher: Arc<dyn QueuePublisher>,
        response_queue: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        Self {
            direct,
            publisher,
            response_queue: response_queue.into(),
            processed_by: processed_by.into(),
        }
    }

    /// Deliver `answer` for `question`.
    ///
    /// Returns an error only when the fallback publish itself fails.
    pub async fn route(
        &self,
        question: &Question,
        answer: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let reason = match question.recipient() {
            Some(recipient) => match self.try_direct(recipient, answer).await {
                Ok(()) => {
                    metrics::record_delivery("direct");
                    info!(
                        question_id = %question.question_id,
                        thread_id = %recipient.thread_id,
                        "Answer delivered to thread"
                    );
                    return Ok(DeliveryOutcome::Delivered);
                }
                Err(e) => {
                    warn!(
                        question_id = %question.question_id,
                        thread_id = %recipient.thread_id,
                        error = %e,
                        "Direct delivery failed, falling back to response queue"
                    );
                    e.to_string()
                }
            },
            None => "question is not addressed to a thread".to_string(),
        };

        match self.publish_fallback(question, answer).await {
            Ok(()) => {
                metrics::record_delivery("fallback");
                debug!(
                    question_id = %question.question_id,
                    queue = %self.response_queue,
                    "Answer published to response queue"
                );
                Ok(DeliveryOutcome::FallbackPublished { reason })
            }
            Err(e) => {
                metrics::record_delivery("fallback_failed");
                Err(e)
            }
        }
    }

    async fn try_direct(
        &self,
        recipient: Recipient<'_>,
        answer: &str,
    ) -> Result<(), DeliveryError> {
        match &self.direct {
            Some(client) => client.post(recipient, answer).await,
            None => Err(DeliveryError::NotConfigured),
        }
    }

    async fn publish_fallback(
        &self,
        question: &Question,
        answer: &str,
    ) -> Result<(), DeliveryError> {
        let response = FallbackResponse {
            question_id: question.question_id.clone(),
            question: question.content.clone(),
            response: answer.to_string(),
            timestamp: Utc::now(),
            processed_by: self.processed_by.clone(),
        };

        let envelope = QueueEnvelope::json(&response)
            .map_err(QueueError::from)?
            .with_message_id(question.question_id.as_str());
        self.publisher.publish(&self.response_queue, &envelope).await?;
        Ok(())
    }
}
