//! Shared types for the question/answer relay.
//!
//! Everything that crosses a crate boundary lives here: the typed queue
//! envelope, the producer body shapes, the normalized question, the
//! direct-delivery and fallback payloads, and the settle decision handed
//! back to the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod telemetry;

/// AMQP header carrying the redelivery counter.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Question id used when the inbound body does not carry one.
pub const UNKNOWN_QUESTION_ID: &str = "unknown";

// ============================================================================
// Queue Envelope
// ============================================================================

/// A message as it is written to a queue.
///
/// The redelivery counter travels next to the payload instead of being an
/// optional header that may or may not be present: every publish writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEnvelope {
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub message_id: Option<String>,
}

impl QueueEnvelope {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            retry_count: 0,
            message_id: None,
        }
    }

    /// Serialize `value` as the JSON payload of a first-attempt envelope
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

// ============================================================================
// Producer Body Shapes
// ============================================================================

/// Body written by the producer.
///
/// `Addressed` targets a conversation and enables direct delivery of the
/// answer; `Legacy` is the original unaddressed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionBody {
    Addressed {
        id: String,
        thread_id: String,
        user_id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    Legacy {
        question_id: String,
        question: String,
        timestamp: DateTime<Utc>,
    },
}

impl QuestionBody {
    /// Build an unaddressed question with a freshly generated id
    pub fn legacy(question: impl Into<String>) -> Self {
        Self::Legacy {
            question_id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build a conversation-addressed question with a freshly generated id
    pub fn addressed(
        question: impl Into<String>,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::Addressed {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            content: question.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn question_id(&self) -> &str {
        match self {
            Self::Addressed { id, .. } => id,
            Self::Legacy { question_id, .. } => question_id,
        }
    }

    /// Wrap the body into a persistent first-attempt envelope
    pub fn to_envelope(&self) -> serde_json::Result<QueueEnvelope> {
        Ok(QueueEnvelope::json(self)?.with_message_id(self.question_id()))
    }
}

// ============================================================================
// Normalized Question
// ============================================================================

/// A question after intake normalization, independent of the body shape it
/// arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question_id: String,
    pub content: String,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
}

/// Conversation a question can be answered into directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient<'a> {
    pub thread_id: &'a str,
    pub user_id: &'a str,
}

impl Question {
    /// Both `thread_id` and `user_id` must be present and non-blank
    pub fn recipient(&self) -> Option<Recipient<'_>> {
        let thread_id = self.thread_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let user_id = self.user_id.as_deref().filter(|s| !s.trim().is_empty())?;
        Some(Recipient { thread_id, user_id })
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

// ============================================================================
// Consumed Messages
// ============================================================================

/// A delivery handed from the consumer to the processing callback.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub body: Vec<u8>,
    pub retry_count: u32,
    /// Queue the delivery was consumed from; retries are republished here
    pub source_queue: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub message_id: Option<String>,
}

impl IncomingMessage {
    /// Same body, same message id, new counter
    pub fn redelivery(&self, retry_count: u32) -> QueueEnvelope {
        QueueEnvelope {
            payload: self.body.clone(),
            retry_count,
            message_id: self.message_id.clone(),
        }
    }
}

/// How the consumer must settle a delivery with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// `requeue: false` hands the message to the broker's dead-letter routing
    Reject { requeue: bool },
}

// ============================================================================
// Delivery Payloads
// ============================================================================

/// Body of the direct-delivery call to the conversation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub paths: Option<Vec<String>>,
}

impl ThreadMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: "text".to_string(),
            paths: None,
        }
    }
}

/// Answer published to the response queue when direct delivery is not
/// possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub question_id: String,
    pub question: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub processed_by: String,
}
