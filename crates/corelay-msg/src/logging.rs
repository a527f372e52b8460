//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Delivery logging and Prometheus messaging metrics."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::transport::Delivery;

/// Direction of message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message received from a subscription.
    Inbound,
    /// Message requeued after a negative acknowledgement.
    Redelivery,
    /// Message abandoned.
    Dropped,
}

/// Emit a structured log entry for delivery activity.
pub fn log_delivery(direction: MessageDirection, delivery: &Delivery) {
    debug!(
        message_id = %delivery.message_id,
        topic = %delivery.topic,
        attempt = delivery.attempt,
        bytes = delivery.body.len(),
        direction = ?direction,
        "messaging activity"
    );
}

/// Prometheus counters for topic traffic, labelled by topic name.
#[derive(Clone)]
pub struct MessagingMetrics {
    published: IntCounterVec,
    delivered: IntCounterVec,
    redelivered: IntCounterVec,
    dropped: IntCounterVec,
}

impl MessagingMetrics {
    /// Create the counters and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.published.clone()))?;
        registry.register(Box::new(metrics.delivered.clone()))?;
        registry.register(Box::new(metrics.redelivered.clone()))?;
        registry.register(Box::new(metrics.dropped.clone()))?;
        Ok(metrics)
    }

    /// Create counters that are not exported anywhere.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Ok(Self {
            published: counter(
                "corelay_messages_published_total",
                "Envelopes successfully published to a topic",
            )?,
            delivered: counter(
                "corelay_messages_delivered_total",
                "Deliveries handed to a handler",
            )?,
            redelivered: counter(
                "corelay_messages_redelivered_total",
                "Deliveries requeued after a negative acknowledgement",
            )?,
            dropped: counter(
                "corelay_messages_dropped_total",
                "Deliveries abandoned without successful processing",
            )?,
        })
    }

    /// Record a successful publish.
    pub fn observe_published(&self, topic: &str) {
        self.published.with_label_values(&[topic]).inc();
    }

    /// Record a delivery handed to a handler.
    pub fn observe_delivered(&self, topic: &str) {
        self.delivered.with_label_values(&[topic]).inc();
    }

    /// Record a redelivery.
    pub fn observe_redelivered(&self, topic: &str) {
        self.redelivered.with_label_values(&[topic]).inc();
    }

    /// Record an abandoned delivery.
    pub fn observe_dropped(&self, topic: &str) {
        self.dropped.with_label_values(&[topic]).inc();
    }

    /// Current dropped count for `topic`.
    pub fn dropped(&self, topic: &str) -> u64 {
        self.dropped.with_label_values(&[topic]).get()
    }

    /// Current redelivery count for `topic`.
    pub fn redelivered(&self, topic: &str) -> u64 {
        self.redelivered.with_label_values(&[topic]).get()
    }
}

impl std::fmt::Debug for MessagingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingMetrics").finish_non_exhaustive()
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(Opts::new(name, help), &["topic"])
}
