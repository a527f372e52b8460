//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Writes delivered outcomes into the correlation store."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use corelay_logging::{relay_debug, relay_error, relay_warn, LogContext};
use corelay_msg::{
    Acknowledgement, DecodeError, Delivery, FailureKind, MessageHandler, OperationResult,
    OutcomeEnvelope,
};
use corelay_store::{CorrelationRecord, CorrelationStore};

const COMPONENT: &str = "persister";

/// Outcome topic consumer. Upserts are keyed, so duplicate deliveries are harmless.
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn CorrelationStore>,
}

impl Persister {
    /// Persist outcomes into `store`.
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for Persister {
    async fn handle(&self, delivery: &Delivery) -> Acknowledgement {
        let record = match OutcomeEnvelope::decode(&delivery.body) {
            Ok(outcome) => CorrelationRecord::from_outcome(outcome),
            Err(DecodeError::Uncorrelated { reason }) => {
                relay_error!(
                    context = LogContext::component(COMPONENT).with_attempt(delivery.attempt),
                    "dropping uncorrelated outcome from '{}': {reason}",
                    delivery.topic
                );
                return Acknowledgement::Ack;
            }
            // the waiting submitter still gets an answer
            Err(DecodeError::Malformed { request_id, reason }) => {
                relay_warn!(
                    context = LogContext::component(COMPONENT)
                        .with_request(request_id.as_str())
                        .with_attempt(delivery.attempt),
                    "storing undecodable outcome as malformed: {reason}"
                );
                CorrelationRecord::new(
                    request_id,
                    OperationResult::failure(FailureKind::MalformedRequest, reason),
                )
            }
        };

        let request_id = record.request_id.clone();
        let context = LogContext::component(COMPONENT)
            .with_request(request_id.as_str())
            .with_attempt(delivery.attempt);
        match self.store.upsert(record).await {
            Ok(()) => {
                relay_debug!(context = context, "correlation record stored");
                Acknowledgement::Ack
            }
            Err(err) if err.is_transient() => {
                relay_warn!(context = context, "store write failed: {err}");
                Acknowledgement::Nack(err.to_string())
            }
            Err(err) => {
                relay_error!(context = context, "record rejected by store: {err}");
                Acknowledgement::Ack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelay_msg::{MessageId, RequestId};
    use corelay_store::InMemoryCorrelationStore;
    use serde_json::json;

    fn delivery(body: String) -> Delivery {
        Delivery {
            message_id: MessageId::new(),
            topic: "relay-outcomes".into(),
            body,
            attempt: 1,
        }
    }

    fn outcome(id: &str) -> String {
        OutcomeEnvelope::new(
            RequestId::from(id),
            OperationResult::failure(FailureKind::Unauthenticated, "credential required"),
        )
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_outcomes_store_one_record() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let persister = Persister::new(store.clone());
        for _ in 0..3 {
            assert_eq!(
                persister.handle(&delivery(outcome("r-1"))).await,
                Acknowledgement::Ack
            );
        }
        assert_eq!(store.len(), 1);
        let record = store.get(&RequestId::from("r-1")).await.unwrap().unwrap();
        assert_eq!(
            record.response.failure_kind(),
            Some(FailureKind::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn legacy_data_envelopes_are_stored_as_success() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let persister = Persister::new(store.clone());
        let body = json!({"requestId": "r-2", "data": {"login": {"token": "x"}}}).to_string();
        persister.handle(&delivery(body)).await;
        let record = store.get(&RequestId::from("r-2")).await.unwrap().unwrap();
        assert_eq!(
            record.response,
            OperationResult::success(json!({"login": {"token": "x"}}))
        );
    }

    #[tokio::test]
    async fn uncorrelated_outcomes_are_dropped() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let persister = Persister::new(store.clone());
        for body in ["{}".to_owned(), json!({"data": {}}).to_string(), "not json".to_owned()] {
            assert_eq!(persister.handle(&delivery(body)).await, Acknowledgement::Ack);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn undecodable_results_are_stored_as_malformed() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        let persister = Persister::new(store.clone());
        let body = json!({"requestId": "r-3", "result": {"status": "maybe"}}).to_string();
        assert_eq!(persister.handle(&delivery(body)).await, Acknowledgement::Ack);

        assert_eq!(store.len(), 1);
        let record = store.get(&RequestId::from("r-3")).await.unwrap().unwrap();
        assert_eq!(
            record.response.failure_kind(),
            Some(FailureKind::MalformedRequest)
        );
    }

    #[tokio::test]
    async fn malformed_record_writes_are_retried() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        store.fail_next_writes(1);
        let persister = Persister::new(store.clone());
        let body = json!({"requestId": "r-5", "result": 17}).to_string();
        assert!(matches!(
            persister.handle(&delivery(body.clone())).await,
            Acknowledgement::Nack(_)
        ));
        assert_eq!(persister.handle(&delivery(body)).await, Acknowledgement::Ack);
        assert!(store.get(&RequestId::from("r-5")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transient_store_failures_are_nacked() {
        let store = Arc::new(InMemoryCorrelationStore::new());
        store.fail_next_writes(1);
        let persister = Persister::new(store.clone());
        assert!(matches!(
            persister.handle(&delivery(outcome("r-4"))).await,
            Acknowledgement::Nack(_)
        ));
        assert_eq!(
            persister.handle(&delivery(outcome("r-4"))).await,
            Acknowledgement::Ack
        );
        assert_eq!(store.len(), 1);
    }
}
