//! Passive topology checks.
//!
//! Queues and the dead-letter exchange are provisioned by deployment; the
//! relay never declares them. A failed passive declare closes the channel it
//! ran on, so every check gets a fresh one.

use lapin::options::{ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ExchangeKind};
use qa_config::QueueConfig;
use tracing::{debug, info, warn};

use crate::{QueueError, Result};

const NOT_FOUND: u16 = 404;

/// A passive declare of an absent entity fails with a 404 channel error.
/// Anything else, such as 403 access refused, is a real failure.
fn is_not_found(err: &lapin::Error) -> bool {
    matches!(err, lapin::Error::ProtocolError(e) if e.get_id() == NOT_FOUND)
}

async fn close_check_channel(channel: &Channel) {
    if let Err(e) = channel.close(200, "OK").await {
        debug!(error = %e, "Topology check channel already closed");
    }
}

/// Outcome of checking the optional parts of the topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyReport {
    pub failed_queue_present: bool,
    pub dead_letter_exchange_present: bool,
}

pub async fn queue_exists(connection: &Connection, queue: &str) -> Result<bool> {
    let channel = connection.create_channel().await?;
    let declared = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await;

    match declared {
        Ok(_) => {
            close_check_channel(&channel).await;
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn exchange_exists(connection: &Connection, exchange: &str) -> Result<bool> {
    let channel = connection.create_channel().await?;
    let declared = channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await;

    match declared {
        Ok(_) => {
            close_check_channel(&channel).await;
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Input and response queues are required. The failed queue and the
/// dead-letter exchange only produce a warning when absent.
pub async fn verify_topology(
    connection: &Connection,
    queues: &QueueConfig,
) -> Result<TopologyReport> {
    for queue in [&queues.input, &queues.responses] {
        if !queue_exists(connection, queue).await? {
            return Err(QueueError::QueueMissing {
                queue: queue.clone(),
            });
        }
    }

    let report = TopologyReport {
        failed_queue_present: queue_exists(connection, &queues.failed).await?,
        dead_letter_exchange_present: exchange_exists(connection, &queues.dead_letter_exchange)
            .await?,
    };

    if !report.failed_queue_present {
        warn!(queue = %queues.failed, "Failed-message queue not found");
    }
    if !report.dead_letter_exchange_present {
        warn!(
            exchange = %queues.dead_letter_exchange,
            "Dead-letter exchange not found, rejected messages will be discarded"
        );
    }

    info!(
        input = %queues.input,
        responses = %queues.responses,
        "Topology verified"
    );
    Ok(report)
}
