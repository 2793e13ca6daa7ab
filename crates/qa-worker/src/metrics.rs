//! Prometheus metrics for message processing

use std::time::Duration;

use ::metrics::{counter, histogram};

use crate::processor::ProcessingOutcome;

pub fn record_outcome(outcome: &ProcessingOutcome) {
    counter!("qa_messages_processed_total", "outcome" => outcome.as_str()).increment(1);
}

/// `route` is one of `direct`, `fallback`, `fallback_failed`
pub fn record_delivery(route: &'static str) {
    counter!("qa_delivery_total", "route" => route).increment(1);
}

pub fn record_completion_duration(elapsed: Duration, success: bool) {
    let result = if success { "success" } else { "failure" };
    histogram!("qa_completion_duration_seconds", "result" => result).record(elapsed.as_secs_f64());
}
