//! Question producer.
//!
//! Used by the `qa-publish` CLI and the `/questions` endpoint. Every call
//! opens its own connection, checks that the input queue exists, publishes
//! with confirms and closes the connection again.

use async_trait::async_trait;
use lapin::options::ConfirmSelectOptions;
use lapin::Connection;
use qa_common::QuestionBody;
use qa_config::BrokerConfig;
use tracing::{info, warn};

use crate::connection::{ConnectRetry, ConnectionManager};
use crate::rabbitmq::publish_confirmed;
use crate::topology::queue_exists;
use crate::{QueueError, Result};

/// A question submitted for asynchronous answering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRequest {
    pub question: String,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
}

impl QuestionRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            thread_id: None,
            user_id: None,
        }
    }

    pub fn addressed_to(
        mut self,
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.thread_id = Some(thread_id.into());
        self.user_id = Some(user_id.into());
        self
    }

    /// Addressed shape when both ids are given and non-blank, legacy otherwise
    pub fn into_body(self) -> QuestionBody {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match (non_blank(self.thread_id), non_blank(self.user_id)) {
            (Some(thread_id), Some(user_id)) => {
                QuestionBody::addressed(self.question, thread_id, user_id)
            }
            _ => QuestionBody::legacy(self.question),
        }
    }
}

/// Seam between the HTTP intake endpoint and the broker
#[async_trait]
pub trait QuestionPublisher: Send + Sync {
    /// Enqueue the question and return its generated id
    async fn submit(&self, request: QuestionRequest) -> Result<String>;
}

pub struct Producer {
    connections: ConnectionManager,
    queue: String,
}

impl Producer {
    pub fn new(broker: BrokerConfig, queue: impl Into<String>) -> Self {
        Self {
            connections: ConnectionManager::new(broker),
            queue: queue.into(),
        }
    }

    pub fn with_retry(mut self, retry: ConnectRetry) -> Self {
        self.connections = self.connections.with_retry(retry);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish an unaddressed question; the answer lands on the response queue
    pub async fn publish(&self, question: &str) -> Result<String> {
        self.send(QuestionBody::legacy(question)).await
    }

    /// Publish a question whose answer is posted into `thread_id`
    pub async fn publish_addressed(
        &self,
        question: &str,
        thread_id: &str,
        user_id: &str,
    ) -> Result<String> {
        self.send(QuestionBody::addressed(question, thread_id, user_id)).await
    }

    async fn send(&self, body: QuestionBody) -> Result<String> {
        let connection = self.connections.connect().await?;
        let result = self.send_on(&connection, &body).await;

        if let Err(e) = connection.close(200, "OK").await {
            warn!(error = %e, "Failed to close producer connection");
        }

        let question_id = result?;
        info!(
            question_id = %question_id,
            queue = %self.queue,
            addressed = matches!(body, QuestionBody::Addressed { .. }),
            "Question published"
        );
        Ok(question_id)
    }

    async fn send_on(&self, connection: &Connection, body: &QuestionBody) -> Result<String> {
        if !queue_exists(connection, &self.queue).await? {
            return Err(QueueError::QueueMissing {
                queue: self.queue.clone(),
            });
        }

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let envelope = body.to_envelope()?;
        publish_confirmed(&channel, &self.queue, &envelope).await?;
        Ok(body.question_id().to_string())
    }
}

#[async_trait]
impl QuestionPublisher for Producer {
    async fn submit(&self, request: QuestionRequest) -> Result<String> {
        self.send(request.into_body()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_ids_is_legacy() {
        let body = QuestionRequest::new("What is ownership?").into_body();
        assert!(matches!(
            body,
            QuestionBody::Legacy { ref question, .. } if question == "What is ownership?"
        ));
    }

    #[test]
    fn test_request_with_both_ids_is_addressed() {
        let body = QuestionRequest::new("Explain lifetimes")
            .addressed_to("t1", "u1")
            .into_body();

        match body {
            QuestionBody::Addressed {
                thread_id,
                user_id,
                content,
                ..
            } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(user_id, "u1");
                assert_eq!(content, "Explain lifetimes");
            }
            other => panic!("expected addressed body, got {:?}", other),
        }
    }

    #[test]
    fn test_request_with_blank_id_is_legacy() {
        let mut request = QuestionRequest::new("q").addressed_to("t1", "u1");
        request.user_id = Some(" ".to_string());
        assert!(matches!(request.into_body(), QuestionBody::Legacy { .. }));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = QuestionRequest::new("q").into_body();
        let b = QuestionRequest::new("q").into_body();
        assert_ne!(a.question_id(), b.question_id());
    }
}
