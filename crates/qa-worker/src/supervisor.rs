//! Supervised consume loop.
//!
//! A session connects, verifies the topology, opens a consumer channel and a
//! confirm-mode publisher channel, then processes deliveries one at a time
//! until the consumer stream ends or the broker fails. The supervisor waits
//! `restart_delay` and starts a new session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qa_config::AppConfig;
use qa_queue::{
    verify_topology, ConnectionManager, QueueError, QueuePublisher, RabbitMqConsumer,
    RabbitMqPublisher,
};
use tracing::{debug, error, info, warn};

use crate::completion::Completer;
use crate::delivery::{DeliveryRouter, DirectDeliveryClient};
use crate::processor::MessageProcessor;
use crate::retry::RetryPolicy;
use crate::Result;

pub struct Worker {
    config: AppConfig,
    connections: ConnectionManager,
    completer: Arc<dyn Completer>,
    direct: Option<DirectDeliveryClient>,
    policy: RetryPolicy,
}

impl Worker {
    pub fn new(config: AppConfig, completer: Arc<dyn Completer>) -> Result<Self> {
        let direct = DirectDeliveryClient::from_config(&config.delivery)?;
        let connections = ConnectionManager::new(config.broker.clone());
        let policy = RetryPolicy::new(config.retry.max_retries);

        Ok(Self {
            config,
            connections,
            completer,
            direct,
            policy,
        })
    }

    /// Run consume sessions forever
    pub async fn run(&self) {
        supervise(self.config.worker.restart_delay(), |_| self.run_session()).await
    }

    async fn run_session(&self) -> Result<()> {
        let queues = &self.config.queues;
        let connection = self.connections.connect().await?;
        verify_topology(&connection, queues).await?;

        let publisher: Arc<dyn QueuePublisher> = Arc::new(
            RabbitMqPublisher::open(&connection, self.config.worker.processed_by.clone()).await?,
        );
        let router = DeliveryRouter::new(
            self.direct.clone(),
            publisher.clone(),
            queues.responses.clone(),
            self.config.worker.processed_by.clone(),
        );
        let processor =
            MessageProcessor::new(self.completer.clone(), router, publisher, self.policy);

        let channel = connection.create_channel().await.map_err(QueueError::from)?;
        let consumer_tag = &self.config.worker.consumer_tag;
        let mut consumer = RabbitMqConsumer::start(&channel, &queues.input, consumer_tag).await?;

        info!(
            queue = %consumer.queue(),
            max_retries = self.policy.max_retries,
            "Waiting for questions"
        );

        let result = self.consume(&mut consumer, &processor).await;

        if let Err(e) = connection.close(200, "OK").await {
            debug!(error = %e, "Connection already closed");
        }
        result
    }

    async fn consume(
        &self,
        consumer: &mut RabbitMqConsumer,
        processor: &MessageProcessor,
    ) -> Result<()> {
        while let Some(received) = consumer.next().await {
            let received = received?;
            let outcome = processor.process(&received.message).await;
            let disposition = outcome.disposition();

            debug!(
                delivery_tag = received.message.delivery_tag,
                outcome = outcome.as_str(),
                disposition = ?disposition,
                "Settling delivery"
            );
            received.settle(disposition).await?;
        }
        Ok(())
    }
}

/// Restart `session` forever, waiting `restart_delay` after each one ends.
///
/// `session` receives the 1-based session number.
pub async fn supervise<F, Fut>(restart_delay: Duration, mut session: F)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut number: u32 = 0;
    loop {
        number = number.saturating_add(1);
        match session(number).await {
            Ok(()) => warn!(session = number, "Consumer stream ended"),
            Err(e) => error!(session = number, error = %e, "Consume session failed"),
        }

        info!(
            delay_secs = restart_delay.as_secs(),
            "Restarting consume session"
        );
        tokio::time::sleep(restart_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use parking_lot::Mutex;
    use qa_queue::QueueError;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_failed_sessions_restart_after_delay() {
        let delay = Duration::from_secs(5);
        let started: Mutex<Vec<(u32, Instant)>> = Mutex::new(Vec::new());

        let supervised = supervise(delay, |number| {
            started.lock().push((number, Instant::now()));
            async {
                Err(WorkerError::Queue(QueueError::QueueMissing {
                    queue: "chatbot_questions".into(),
                }))
            }
        });
        let result = tokio::time::timeout(delay * 3 + Duration::from_secs(1), supervised).await;
        assert!(result.is_err(), "supervisor never returns");

        let started = started.lock();
        let numbers: Vec<u32> = started.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        for pair in started.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert!(gap >= delay && gap < delay + Duration::from_millis(10), "{gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_also_restarts() {
        let delay = Duration::from_secs(2);
        let sessions = Mutex::new(0u32);

        let supervised = supervise(delay, |_| {
            *sessions.lock() += 1;
            async { Ok(()) }
        });
        let _ = tokio::time::timeout(delay + Duration::from_millis(500), supervised).await;

        assert_eq!(*sessions.lock(), 2);
    }
}
