//! RabbitMQ publisher and consumer used by the worker

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use qa_common::{Disposition, IncomingMessage, QueueEnvelope};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::headers::{envelope_properties, retry_count_from};
use crate::{QueueError, QueuePublisher, Result};

// ============================================================================
// Publisher
// ============================================================================

/// Publishes to the default exchange on a confirm-mode channel.
///
/// Each publish is mandatory and waits for the broker confirm, so a returned
/// `Ok` means the message was routed to a queue and is durable there.
pub struct RabbitMqPublisher {
    channel: Arc<Mutex<Channel>>,
    identifier: String,
}

impl RabbitMqPublisher {
    /// Open a dedicated channel on `connection` and enable publisher confirms
    pub async fn open(connection: &Connection, identifier: impl Into<String>) -> Result<Self> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        Ok(Self {
            channel: Arc::new(Mutex::new(channel)),
            identifier: identifier.into(),
        })
    }
}

#[async_trait]
impl QueuePublisher for RabbitMqPublisher {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn publish(&self, queue: &str, envelope: &QueueEnvelope) -> Result<()> {
        let channel = self.channel.lock().await;
        publish_confirmed(&channel, queue, envelope).await
    }
}

/// Mandatory so the broker returns a message no queue is bound for
fn publish_options() -> BasicPublishOptions {
    BasicPublishOptions {
        mandatory: true,
        ..BasicPublishOptions::default()
    }
}

/// An ack that carries a returned message means the publish was unroutable
fn check_confirmation(queue: &str, confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Nack(_) => Err(QueueError::PublishNacked {
            queue: queue.to_string(),
        }),
        Confirmation::Ack(Some(_)) => Err(QueueError::Unroutable {
            queue: queue.to_string(),
        }),
        Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
    }
}

/// Publish on a channel that is already in confirm mode and wait for the ack
pub(crate) async fn publish_confirmed(
    channel: &Channel,
    queue: &str,
    envelope: &QueueEnvelope,
) -> Result<()> {
    let confirmation = channel
        .basic_publish(
            "",
            queue,
            publish_options(),
            &envelope.payload,
            envelope_properties(envelope),
        )
        .await?
        .await?;
    check_confirmation(queue, confirmation)?;

    debug!(
        queue = %queue,
        retry_count = envelope.retry_count,
        message_id = ?envelope.message_id,
        "Message published"
    );
    Ok(())
}

// ============================================================================
// Consumer
// ============================================================================

/// A consumed message together with the handle that settles it
pub struct ReceivedMessage {
    pub message: IncomingMessage,
    acker: Acker,
}

impl ReceivedMessage {
    fn from_delivery(delivery: Delivery, queue: &str) -> Self {
        let properties = &delivery.properties;
        let message = IncomingMessage {
            retry_count: retry_count_from(properties.headers().as_ref()),
            message_id: properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            source_queue: queue.to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            body: delivery.data,
        };

        Self {
            message,
            acker: delivery.acker,
        }
    }

    pub async fn settle(self, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => self.acker.ack(BasicAckOptions::default()).await?,
            Disposition::Reject { requeue } => {
                self.acker.reject(BasicRejectOptions { requeue }).await?
            }
        }
        Ok(())
    }
}

/// Manual-ack consumer with prefetch 1: one unsettled delivery at a time.
pub struct RabbitMqConsumer {
    queue: String,
    consumer: lapin::Consumer,
}

impl RabbitMqConsumer {
    pub async fn start(channel: &Channel, queue: &str, consumer_tag: &str) -> Result<Self> {
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue, consumer_tag = %consumer_tag, "Consumer started");
        Ok(Self {
            queue: queue.to_string(),
            consumer,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the broker closes the consumer
    pub async fn next(&mut self) -> Option<Result<ReceivedMessage>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| ReceivedMessage::from_delivery(d, &self.queue))
                .map_err(QueueError::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publishes_are_mandatory() {
        let options = publish_options();
        assert!(options.mandatory);
        assert!(!options.immediate);
    }

    #[test]
    fn test_plain_ack_is_accepted() {
        assert!(check_confirmation("q", Confirmation::Ack(None)).is_ok());
        assert!(check_confirmation("q", Confirmation::NotRequested).is_ok());
    }

    #[test]
    fn test_nack_is_rejected() {
        let err = check_confirmation("answers", Confirmation::Nack(None)).unwrap_err();
        assert!(matches!(err, QueueError::PublishNacked { ref queue } if queue == "answers"));
    }
}
