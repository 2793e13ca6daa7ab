//! Broker connection with bounded retries

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use lapin::{Connection, ConnectionProperties};
use metrics::counter;
use qa_config::BrokerConfig;
use tracing::{info, warn};

use crate::{QueueError, Result};

/// Retry schedule for establishing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&BrokerConfig> for ConnectRetry {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            max_attempts: config.connect_attempts.max(1),
            delay: config.connect_retry_delay(),
            attempt_timeout: config.connect_timeout(),
        }
    }
}

/// Run `attempt` until it succeeds or `max_attempts` is reached, sleeping
/// `delay` between failures. The attempt number passed in starts at 1.
pub async fn retry_connect<T, E, F, Fut>(retry: &ConnectRetry, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        match tokio::time::timeout(retry.attempt_timeout, attempt(n)).await {
            Ok(Ok(value)) => {
                counter!("qa_connection_attempts_total", "result" => "success").increment(1);
                return Ok(value);
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("attempt timed out after {:?}", retry.attempt_timeout)
            }
        }

        counter!("qa_connection_attempts_total", "result" => "failure").increment(1);
        warn!(
            attempt = n,
            max_attempts = max_attempts,
            error = %last_error,
            "Broker connection attempt failed"
        );

        if n < max_attempts {
            tokio::time::sleep(retry.delay).await;
        }
    }

    Err(QueueError::ConnectionExhausted {
        attempts: max_attempts,
        last_error,
    })
}

/// Opens AMQP connections from the broker section of the config
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: BrokerConfig,
    retry: ConnectRetry,
}

impl ConnectionManager {
    pub fn new(config: BrokerConfig) -> Self {
        let retry = ConnectRetry::from(&config);
        Self { config, retry }
    }

    pub fn with_retry(mut self, retry: ConnectRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> &ConnectRetry {
        &self.retry
    }

    pub async fn connect(&self) -> Result<Connection> {
        let uri = self.config.amqp_uri();
        info!(
            host = %self.config.host,
            port = self.config.port,
            vhost = %self.config.vhost,
            "Connecting to RabbitMQ"
        );

        let connection = retry_connect(&self.retry, |_| {
            Connection::connect(&uri, ConnectionProperties::default())
        })
        .await?;

        info!(host = %self.config.host, "Connected to RabbitMQ");
        Ok(connection)
    }
}
