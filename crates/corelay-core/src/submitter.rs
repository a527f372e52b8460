//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Caller-side submit-and-wait over the request topic and store."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! The submitter is the synchronous face of the relay: it assigns a request id,
//! broadcasts the request, and then polls the correlation store until a record
//! for that id appears or the poll budget runs out. Polling only ever reads, so
//! abandoning a wait at any point leaves the store untouched.

use std::sync::Arc;
use std::time::Duration;

use corelay_logging::{relay_debug, relay_info, relay_warn, LogContext};
use corelay_msg::{
    FailureKind, MessagingMetrics, OperationResult, Parameters, RequestEnvelope, RequestId, Topic,
    TransportError,
};
use corelay_store::CorrelationStore;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::metrics::RelayMetrics;
use crate::poll::PollStrategy;

const COMPONENT: &str = "submitter";

/// Errors returned to callers of [`Submitter::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The request could not be broadcast. Nothing was sent and no record will appear.
    #[error("request {request_id} could not be broadcast: {source}")]
    Transport {
        /// Id the request would have carried.
        request_id: RequestId,
        /// Underlying publish failure.
        #[source]
        source: TransportError,
    },
    /// The request could not be serialized.
    #[error("request {request_id} could not be encoded: {source}")]
    Encode {
        /// Id the request would have carried.
        request_id: RequestId,
        /// Serialization failure.
        #[source]
        source: serde_json::Error,
    },
    /// No outcome was observed within the poll budget.
    #[error("no outcome for request {request_id} after {attempts} attempts ({waited:?})")]
    Timeout {
        /// Id of the broadcast request; a late record may still appear under it.
        request_id: RequestId,
        /// Store reads performed.
        attempts: u32,
        /// Time spent waiting.
        waited: Duration,
    },
    /// The caller cancelled the wait.
    #[error("wait for request {request_id} was cancelled")]
    Cancelled {
        /// Id of the broadcast request.
        request_id: RequestId,
    },
    /// The relay answered with a failure outcome.
    #[error("request {request_id} failed with {kind}: {message}")]
    Rejected {
        /// Id of the answered request.
        request_id: RequestId,
        /// Failure classification.
        kind: FailureKind,
        /// Failure message, verbatim from the outcome.
        message: String,
    },
}

impl SubmitError {
    /// Correlation key of the affected request.
    pub fn request_id(&self) -> &RequestId {
        match self {
            SubmitError::Transport { request_id, .. }
            | SubmitError::Encode { request_id, .. }
            | SubmitError::Timeout { request_id, .. }
            | SubmitError::Cancelled { request_id }
            | SubmitError::Rejected { request_id, .. } => request_id,
        }
    }

    /// `Timeout` and `Transport` may succeed on a fresh submission; everything else is
    /// terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Timeout { .. } | SubmitError::Transport { .. })
    }

    /// Whether the poll budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SubmitError::Timeout { .. })
    }
}

/// The answer to one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    request_id: RequestId,
    result: OperationResult,
    attempts: u32,
}

impl Outcome {
    /// Correlation key of the answered request.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Stored result, success or failure.
    pub fn result(&self) -> &OperationResult {
        &self.result
    }

    /// Store read on which the record was found (1-based).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Success payload, or [`SubmitError::Rejected`] for failure outcomes.
    pub fn into_result(self) -> Result<JsonValue, SubmitError> {
        match self.result {
            OperationResult::Success { data } => Ok(data),
            OperationResult::Failure { kind, message } => Err(SubmitError::Rejected {
                request_id: self.request_id,
                kind,
                message,
            }),
        }
    }
}

/// What to run: operation descriptor, arguments and optional credential.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    operation: String,
    parameters: Parameters,
    credential: Option<String>,
}

impl Submission {
    /// Submission of `operation` with no parameters and no credential.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    /// Add one named parameter.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Replace all parameters.
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach a bearer credential.
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    fn into_envelope(self, request_id: RequestId) -> RequestEnvelope {
        RequestEnvelope::new(request_id, self.operation, self.parameters, self.credential)
    }
}

/// Submits requests and waits for their outcomes. Cheap to clone; each call owns its
/// own poll loop.
#[derive(Clone)]
pub struct Submitter {
    requests: Arc<dyn Topic>,
    store: Arc<dyn CorrelationStore>,
    strategy: PollStrategy,
    metrics: RelayMetrics,
    messaging: MessagingMetrics,
}

impl Submitter {
    /// Submitter publishing on `requests` and polling `store` according to `strategy`.
    pub fn new(
        requests: Arc<dyn Topic>,
        store: Arc<dyn CorrelationStore>,
        strategy: PollStrategy,
        metrics: RelayMetrics,
        messaging: MessagingMetrics,
    ) -> Self {
        Self {
            requests,
            store,
            strategy,
            metrics,
            messaging,
        }
    }

    /// Same submitter with a different poll schedule.
    pub fn with_strategy(mut self, strategy: PollStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Current poll schedule.
    pub fn strategy(&self) -> &PollStrategy {
        &self.strategy
    }

    /// Broadcast a request and wait for its outcome.
    pub async fn submit(
        &self,
        operation: impl Into<String>,
        parameters: Parameters,
        credential: Option<String>,
    ) -> Result<Outcome, SubmitError> {
        let mut submission = Submission::new(operation).parameters(parameters);
        submission.credential = credential;
        self.run(submission, None).await
    }

    /// Like [`Submitter::submit`], ending early with [`SubmitError::Cancelled`] once
    /// `cancel` reads `true`. A dropped cancel sender never cancels.
    pub async fn submit_with_cancel(
        &self,
        submission: Submission,
        cancel: watch::Receiver<bool>,
    ) -> Result<Outcome, SubmitError> {
        self.run(submission, Some(cancel)).await
    }

    async fn run(
        &self,
        submission: Submission,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, SubmitError> {
        let request_id = RequestId::generate();
        self.broadcast(submission.into_envelope(request_id.clone()))
            .await?;
        self.metrics.observe_submitted();

        let started = Instant::now();
        let attempts = self.strategy.attempts();
        for attempt in 1..=attempts {
            let context = LogContext::component(COMPONENT)
                .with_request(request_id.as_str())
                .with_attempt(attempt);
            tokio::select! {
                biased;
                _ = cancel_requested(&mut cancel) => {
                    relay_info!(context = context, "wait cancelled by caller");
                    self.metrics.observe_wait(started.elapsed());
                    return Err(SubmitError::Cancelled { request_id });
                }
                _ = tokio::time::sleep(self.strategy.delay_for(attempt)) => {}
            }

            match self.store.get(&request_id).await {
                Ok(Some(record)) => {
                    relay_debug!(context = context, "outcome found");
                    self.metrics.observe_wait(started.elapsed());
                    return Ok(Outcome {
                        request_id,
                        result: record.response,
                        attempts: attempt,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    relay_warn!(context = context, "store read failed: {err}");
                }
            }
        }

        let waited = started.elapsed();
        relay_warn!(
            context = LogContext::component(COMPONENT).with_request(request_id.as_str()),
            "no outcome after {attempts} attempts"
        );
        self.metrics.observe_timeout();
        self.metrics.observe_wait(waited);
        Err(SubmitError::Timeout {
            request_id,
            attempts,
            waited,
        })
    }

    async fn broadcast(&self, envelope: RequestEnvelope) -> Result<(), SubmitError> {
        let body = envelope.encode().map_err(|source| SubmitError::Encode {
            request_id: envelope.request_id.clone(),
            source,
        })?;
        let message_id = self
            .requests
            .publish(body)
            .await
            .map_err(|source| SubmitError::Transport {
                request_id: envelope.request_id.clone(),
                source,
            })?;
        self.messaging.observe_published(self.requests.name());
        relay_debug!(
            context = LogContext::component(COMPONENT)
                .with_request(envelope.request_id.as_str())
                .with_operation(&envelope.operation),
            "request broadcast as message {message_id}"
        );
        Ok(())
    }
}

async fn cancel_requested(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(receiver) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *receiver.borrow_and_update() {
            return;
        }
        if receiver.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
