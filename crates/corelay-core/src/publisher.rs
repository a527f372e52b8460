//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Forwards outcome envelopes to the outcome topic."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;

use corelay_msg::{publish_logged, MessageId, MessagingMetrics, OutcomeEnvelope, Topic};

/// Thin forwarder onto the outcome topic. Failures are returned, never retried here.
#[derive(Clone)]
pub struct OutcomePublisher {
    topic: Arc<dyn Topic>,
    metrics: MessagingMetrics,
}

impl OutcomePublisher {
    /// Publish onto `topic`, counting through `metrics`.
    pub fn new(topic: Arc<dyn Topic>, metrics: MessagingMetrics) -> Self {
        Self { topic, metrics }
    }

    /// Encode and publish one outcome envelope.
    pub async fn publish(&self, outcome: &OutcomeEnvelope) -> corelay_msg::Result<MessageId> {
        let body = outcome.encode()?;
        publish_logged(self.topic.as_ref(), body, &self.metrics).await
    }

    /// Name of the outcome topic.
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Counters shared with the dispatchers.
    pub fn metrics(&self) -> &MessagingMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelay_msg::{InMemoryTopic, MessagingError, OperationResult, RequestId};
    use serde_json::json;

    #[tokio::test]
    async fn forwards_and_reports_failures() {
        let topic = InMemoryTopic::with_journal("relay-outcomes");
        let publisher = OutcomePublisher::new(
            Arc::new(topic.clone()),
            MessagingMetrics::unregistered().unwrap(),
        );
        let outcome = OutcomeEnvelope::new(
            RequestId::from("r-1"),
            OperationResult::success(json!({"ok": true})),
        );

        publisher.publish(&outcome).await.unwrap();
        assert_eq!(topic.journal(), vec![outcome.encode().unwrap()]);

        topic.set_unreachable(true);
        let err = publisher.publish(&outcome).await.unwrap_err();
        assert!(matches!(err, MessagingError::Transport(_)));
        assert_eq!(publisher.topic_name(), "relay-outcomes");
    }
}
