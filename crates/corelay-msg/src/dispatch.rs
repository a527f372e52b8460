//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Bounded concurrent dispatch of subscription deliveries."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! A [`Dispatcher`] owns one [`Subscription`] and hands each delivery to a
//! [`MessageHandler`] on its own task. At most `max_in_flight` handlers run at
//! once. Negative acknowledgements are fed through the [`QoSManager`], which
//! either schedules a redelivery onto the same subscription or drops the message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::logging::{log_delivery, MessageDirection, MessagingMetrics};
use crate::qos::{DeliveryGuarantee, QoSManager, RedeliveryDecision};
use crate::transport::{Delivery, RequeueHandle, Subscription};

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processing finished; the message is settled.
    Ack,
    /// Processing failed transiently; the reason is logged.
    Nack(String),
}

/// Consumer of deliveries from a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one delivery.
    async fn handle(&self, delivery: &Delivery) -> Acknowledgement;
}

/// Tuning for a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running handlers.
    pub max_in_flight: usize,
    /// Redelivery policy for negative acknowledgements.
    pub guarantee: DeliveryGuarantee,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            guarantee: DeliveryGuarantee::default(),
        }
    }
}

impl DispatcherConfig {
    /// At-least-once dispatch with the given limits.
    pub fn at_least_once(max_in_flight: usize, max_retries: u8, retry_interval: Duration) -> Self {
        Self {
            max_in_flight,
            guarantee: DeliveryGuarantee::AtLeastOnce {
                max_retries,
                retry_interval,
            },
        }
    }
}

/// Drives one subscription through a handler.
pub struct Dispatcher<H> {
    name: &'static str,
    subscription: Subscription,
    handler: Arc<H>,
    qos: QoSManager,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    metrics: MessagingMetrics,
}

impl<H: MessageHandler> Dispatcher<H> {
    /// Create a dispatcher. `name` identifies the consumer role in logs.
    pub fn new(
        name: &'static str,
        subscription: Subscription,
        handler: Arc<H>,
        config: DispatcherConfig,
        metrics: MessagingMetrics,
    ) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            name,
            subscription,
            handler,
            qos: QoSManager::new(config.guarantee),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            metrics,
        }
    }

    /// Bookkeeping handle, useful for observing in-flight work.
    pub fn qos(&self) -> QoSManager {
        self.qos.clone()
    }

    /// Run on a background task until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Pull and dispatch deliveries until shutdown, then wait for in-flight handlers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.subscription.topic().to_owned();
        let requeue = self.subscription.requeue_handle();
        info!(consumer = self.name, topic = %topic, "dispatcher started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let delivery = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                next = self.subscription.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            log_delivery(MessageDirection::Inbound, &delivery);
            self.metrics.observe_delivered(&topic);
            self.qos.track(&delivery);

            let handler = Arc::clone(&self.handler);
            let qos = self.qos.clone();
            let metrics = self.metrics.clone();
            let requeue = requeue.clone();
            let name = self.name;
            tokio::spawn(async move {
                let acknowledgement = handler.handle(&delivery).await;
                settle(name, &qos, &metrics, &requeue, delivery, acknowledgement);
                drop(permit);
            });
        }

        // every permit back means every handler has settled
        let capacity = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        let _drained = self.permits.acquire_many(capacity).await;
        info!(consumer = self.name, topic = %topic, "dispatcher stopped");
    }
}

fn settle(
    consumer: &'static str,
    qos: &QoSManager,
    metrics: &MessagingMetrics,
    requeue: &RequeueHandle,
    delivery: Delivery,
    acknowledgement: Acknowledgement,
) {
    let reason = match acknowledgement {
        Acknowledgement::Ack => {
            qos.acknowledge(&delivery);
            return;
        }
        Acknowledgement::Nack(reason) => reason,
    };

    match qos.reject(&delivery) {
        RedeliveryDecision::Redeliver { delivery, after } => {
            warn!(
                consumer,
                message_id = %delivery.message_id,
                next_attempt = delivery.attempt,
                reason = %reason,
                "delivery failed; scheduling redelivery"
            );
            metrics.observe_redelivered(&delivery.topic);
            let requeue = requeue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                log_delivery(MessageDirection::Redelivery, &delivery);
                if let Err(err) = requeue.requeue(delivery) {
                    warn!(consumer, error = %err, "redelivery abandoned");
                }
            });
        }
        RedeliveryDecision::Drop => {
            error!(
                consumer,
                message_id = %delivery.message_id,
                attempt = delivery.attempt,
                reason = %reason,
                "delivery dropped after final attempt"
            );
            log_delivery(MessageDirection::Dropped, &delivery);
            metrics.observe_dropped(&delivery.topic);
        }
    }
}

/// Resolves once `true` is observed or the sender goes away.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
