//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Executes request envelopes and always answers with an outcome."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! Every correlated request produces exactly one outcome envelope per delivery:
//! decode failures become `MalformedRequest`, missing credentials become
//! `Unauthenticated`, and anything the engine does wrong (including panicking or
//! outliving the engine timeout) becomes `EngineError`. Only a failure to publish the outcome is reported back
//! to the dispatcher, which then redelivers the request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelay_logging::{relay_debug, relay_error, relay_warn, LogContext};
use corelay_msg::{
    Acknowledgement, DecodeError, Delivery, FailureKind, MessageHandler,
    Operation, OperationResult, OutcomeEnvelope, RequestEnvelope,
};
use futures::FutureExt;

use crate::engine::{EngineRequest, ExecutionEngine};
use crate::metrics::RelayMetrics;
use crate::publisher::OutcomePublisher;

const COMPONENT: &str = "executor";

/// Request topic consumer.
#[derive(Clone)]
pub struct Executor {
    engine: Arc<dyn ExecutionEngine>,
    publisher: OutcomePublisher,
    metrics: RelayMetrics,
    engine_timeout: Duration,
}

impl Executor {
    /// Build an executor that publishes through `publisher` and gives each engine
    /// call at most `engine_timeout`.
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        publisher: OutcomePublisher,
        metrics: RelayMetrics,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            publisher,
            metrics,
            engine_timeout,
        }
    }

    /// Classify, authorize and run a decoded request.
    pub async fn execute(&self, request: &RequestEnvelope) -> OperationResult {
        let operation = match Operation::parse(&request.operation) {
            Ok(operation) => operation,
            Err(err) => return OperationResult::failure(FailureKind::MalformedRequest, err.to_string()),
        };

        if let Some(root) = operation.protected_root() {
            if request.credential.is_none() {
                return OperationResult::failure(
                    FailureKind::Unauthenticated,
                    format!("operation '{root}' requires a credential"),
                );
            }
        }

        let call = self.engine.execute(EngineRequest {
            request_id: &request.request_id,
            operation: &request.operation,
            parameters: &request.parameters,
            credential: request.credential.as_deref(),
        });
        let guarded = AssertUnwindSafe(call).catch_unwind();
        match tokio::time::timeout(self.engine_timeout, guarded).await {
            Ok(Ok(Ok(data))) => OperationResult::success(data),
            Ok(Ok(Err(err))) => OperationResult::failure(FailureKind::EngineError, err.into_message()),
            Ok(Err(panic)) => OperationResult::failure(
                FailureKind::EngineError,
                format!("engine panicked: {}", panic_message(panic.as_ref())),
            ),
            Err(_) => OperationResult::failure(
                FailureKind::EngineError,
                format!("engine timed out after {:?}", self.engine_timeout),
            ),
        }
    }

    async fn answer(&self, outcome: OutcomeEnvelope, attempt: u32) -> Acknowledgement {
        let context = LogContext::component(COMPONENT)
            .with_request(outcome.request_id.as_str())
            .with_attempt(attempt);
        self.metrics.observe_outcome(&outcome.result);
        match self.publisher.publish(&outcome).await {
            Ok(_) => {
                relay_debug!(context = context, "outcome {} published", outcome.result.status_label());
                Acknowledgement::Ack
            }
            Err(err) => {
                relay_warn!(
                    context = context,
                    "outcome publish to '{}' failed: {err}",
                    self.publisher.topic_name()
                );
                Acknowledgement::Nack(err.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Executor {
    async fn handle(&self, delivery: &Delivery) -> Acknowledgement {
        let request = match RequestEnvelope::decode(&delivery.body) {
            Ok(request) => request,
            Err(DecodeError::Uncorrelated { reason }) => {
                relay_error!(
                    context = LogContext::component(COMPONENT).with_attempt(delivery.attempt),
                    "dropping uncorrelated request from '{}': {reason}",
                    delivery.topic
                );
                self.publisher.metrics().observe_dropped(&delivery.topic);
                return Acknowledgement::Ack;
            }
            Err(DecodeError::Malformed { request_id, reason }) => {
                let outcome = OutcomeEnvelope::new(
                    request_id,
                    OperationResult::failure(FailureKind::MalformedRequest, reason),
                );
                return self.answer(outcome, delivery.attempt).await;
            }
        };

        let result = self.execute(&request).await;
        self.answer(OutcomeEnvelope::new(request.request_id, result), delivery.attempt)
            .await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
