//! Broker access for the question relay
//!
//! RabbitMQ is the only backend. This crate owns:
//! - connection establishment with bounded retries
//! - the retry-count header codec
//! - the confirm-mode publisher and prefetch-1 consumer used by the worker
//! - passive topology verification
//! - the producer used by the CLI and the HTTP intake endpoint

use async_trait::async_trait;
use qa_common::QueueEnvelope;
use thiserror::Error;

pub mod connection;
pub mod headers;
pub mod producer;
pub mod rabbitmq;
pub mod topology;

pub use connection::{retry_connect, ConnectRetry, ConnectionManager};
pub use producer::{Producer, QuestionPublisher, QuestionRequest};
pub use rabbitmq::{RabbitMqConsumer, RabbitMqPublisher, ReceivedMessage};
pub use topology::{verify_topology, TopologyReport};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Queue not found: {queue}")]
    QueueMissing { queue: String },

    #[error("Broker rejected publish to {queue}")]
    PublishNacked { queue: String },

    #[error("No queue bound for publish to {queue}")]
    Unroutable { queue: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Errors that make the intake endpoint report the broker as unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionExhausted { .. }
                | QueueError::QueueMissing { .. }
                | QueueError::Unroutable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Publishes envelopes to a named queue on the default exchange.
///
/// The worker republishes retries and fallback answers through this seam.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    fn identifier(&self) -> &str;

    /// Returns once the broker has confirmed the message
    async fn publish(&self, queue: &str, envelope: &QueueEnvelope) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_errors() {
        assert!(QueueError::QueueMissing { queue: "q".into() }.is_unavailable());
        assert!(QueueError::ConnectionExhausted {
            attempts: 5,
            last_error: "refused".into()
        }
        .is_unavailable());
        assert!(QueueError::Unroutable { queue: "q".into() }.is_unavailable());
        assert!(!QueueError::PublishNacked { queue: "q".into() }.is_unavailable());
    }
}
