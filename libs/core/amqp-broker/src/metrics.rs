//! Broker link metrics

use metrics::counter;

/// A supervisor re-established a link (`connection` or `channel`).
pub fn link_reconnected(link: &'static str) {
    counter!("broker_reconnects_total", "link" => link).increment(1);
}

/// A supervisor attempt failed and will be retried.
pub fn link_retry_failed(link: &'static str) {
    counter!("broker_reconnect_failures_total", "link" => link).increment(1);
}

pub fn consumer_resubscribed() {
    counter!("broker_consumer_resubscribes_total").increment(1);
}

pub fn published(confirmed: bool) {
    let result = if confirmed { "ack" } else { "nack" };
    counter!("broker_published_total", "result" => result).increment(1);
}
