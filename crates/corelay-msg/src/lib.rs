//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Envelope codecs, operation classification, and pub/sub delivery."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod dispatch;
pub mod envelope;
pub mod logging;
pub mod operation;
pub mod qos;
pub mod transport;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised by the messaging layer.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Publishing or subscribing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Envelope serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// An inbound envelope could not be decoded.
    #[error(transparent)]
    Envelope(#[from] DecodeError),
}

pub use dispatch::{
    shutdown_requested, Acknowledgement, Dispatcher, DispatcherConfig, MessageHandler,
};
pub use envelope::{
    DecodeError, FailureKind, OperationResult, OutcomeEnvelope, Parameters, RequestEnvelope,
    RequestId,
};
pub use logging::{log_delivery, MessageDirection, MessagingMetrics};
pub use operation::{AuthRequirement, Operation, OperationError, OperationKind};
pub use qos::{DeliveryGuarantee, QoSManager, RedeliveryDecision};
pub use transport::{
    Delivery, InMemoryTopic, MessageId, RequeueHandle, Subscription, Topic, TransportError,
};

/// Publish an envelope body and record it, returning the topic's message id.
pub async fn publish_logged(
    topic: &dyn Topic,
    body: String,
    metrics: &MessagingMetrics,
) -> Result<MessageId> {
    let message_id = topic.publish(body).await?;
    metrics.observe_published(topic.name());
    tracing::debug!(topic = topic.name(), message_id = %message_id, "envelope published");
    Ok(message_id)
}
