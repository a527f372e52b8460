//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Delivery guarantees and redelivery bookkeeping."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{Delivery, MessageId};

/// Delivery guarantees supported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Hand each delivery to the handler once; negative acknowledgements are dropped.
    AtMostOnce,
    /// Redeliver negatively acknowledged messages until `max_retries` is reached.
    AtLeastOnce {
        /// Maximum number of redeliveries before the message is dropped.
        max_retries: u8,
        /// Waiting period before each redelivery.
        retry_interval: Duration,
    },
}

impl DeliveryGuarantee {
    fn retry_policy(&self) -> Option<(u8, Duration)> {
        match self {
            DeliveryGuarantee::AtLeastOnce {
                max_retries,
                retry_interval,
            } => Some((*max_retries, *retry_interval)),
            DeliveryGuarantee::AtMostOnce => None,
        }
    }
}

impl Default for DeliveryGuarantee {
    fn default() -> Self {
        DeliveryGuarantee::AtLeastOnce {
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
        }
    }
}

/// What to do with a negatively acknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Requeue `delivery` after waiting `after`.
    Redeliver {
        /// Next attempt of the message.
        delivery: Delivery,
        /// Delay before requeueing.
        after: Duration,
    },
    /// Retry budget exhausted or not applicable.
    Drop,
}

/// Tracks in-flight deliveries and decides redeliveries for a guarantee.
#[derive(Debug, Clone)]
pub struct QoSManager {
    guarantee: DeliveryGuarantee,
    in_flight: Arc<Mutex<HashMap<MessageId, usize>>>,
}

impl QoSManager {
    /// Create a manager with the chosen delivery guarantee.
    pub fn new(guarantee: DeliveryGuarantee) -> Self {
        Self {
            guarantee,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Guarantee in effect.
    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.guarantee
    }

    /// Record that a delivery has been handed to a handler.
    pub fn track(&self, delivery: &Delivery) {
        *self.in_flight.lock().entry(delivery.message_id).or_default() += 1;
    }

    /// Mark a delivery as successfully processed.
    pub fn acknowledge(&self, delivery: &Delivery) {
        self.release(delivery.message_id);
    }

    /// Mark a delivery as failed and decide whether it comes back.
    pub fn reject(&self, delivery: &Delivery) -> RedeliveryDecision {
        self.release(delivery.message_id);
        let Some((max_retries, retry_interval)) = self.guarantee.retry_policy() else {
            return RedeliveryDecision::Drop;
        };
        // attempt 1 is the original delivery, so attempts 2..=max_retries+1 are retries
        if delivery.attempt > u32::from(max_retries) {
            return RedeliveryDecision::Drop;
        }
        RedeliveryDecision::Redeliver {
            delivery: delivery.next_attempt(),
            after: retry_interval,
        }
    }

    /// Number of deliveries currently held by handlers.
    pub fn pending_count(&self) -> usize {
        self.in_flight.lock().values().sum()
    }

    fn release(&self, message_id: MessageId) {
        let mut guard = self.in_flight.lock();
        if let Some(count) = guard.get_mut(&message_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                guard.remove(&message_id);
            }
        }
    }
}

impl Default for QoSManager {
    fn default() -> Self {
        Self::new(DeliveryGuarantee::default())
    }
}
