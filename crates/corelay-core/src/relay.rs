//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Wires topics, store, and engine into a running relay."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use corelay_common::AppConfig;
use corelay_logging::{log_relay_event, EventOutcome, LogContext};
use corelay_msg::{DeliveryGuarantee, Dispatcher, DispatcherConfig, InMemoryTopic, Topic};
use corelay_store::{CorrelationStore, MeteredStore, RetentionSweeper};
use prometheus::Registry;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::ExecutionEngine;
use crate::executor::Executor;
use crate::metrics::MetricsBundle;
use crate::persister::Persister;
use crate::poll::PollStrategy;
use crate::publisher::OutcomePublisher;
use crate::submitter::Submitter;

/// Entry point for assembling a relay.
pub struct Relay;

impl Relay {
    /// Spawn the executor and persister dispatchers plus the retention sweeper.
    ///
    /// Metrics go to a fresh registry exposed through [`RelayHandle::registry`], or are
    /// recorded without export when `metrics.enabled` is off.
    pub async fn start(
        config: &AppConfig,
        request_topic: Arc<dyn Topic>,
        outcome_topic: Arc<dyn Topic>,
        store: Arc<dyn CorrelationStore>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<RelayHandle> {
        config.validate().context("invalid relay configuration")?;
        let registry = Registry::new();
        let metrics = if config.metrics.enabled {
            MetricsBundle::register(&registry)
        } else {
            MetricsBundle::unregistered()
        }
        .context("failed to set up relay metrics")?;

        let store: Arc<dyn CorrelationStore> =
            Arc::new(MeteredStore::new(store, metrics.store.clone()));
        let dispatch = DispatcherConfig {
            max_in_flight: config.worker.max_in_flight,
            guarantee: DeliveryGuarantee::AtLeastOnce {
                max_retries: config.worker.max_redeliveries,
                retry_interval: config.worker.redelivery_interval,
            },
        };
        let (shutdown, signal) = watch::channel(false);

        let publisher = OutcomePublisher::new(Arc::clone(&outcome_topic), metrics.messaging.clone());
        let executor = Executor::new(
            engine,
            publisher,
            metrics.relay.clone(),
            config.engine.timeout,
        );
        let persister = Persister::new(Arc::clone(&store));

        // subscribe before anything can be published so no envelope is missed
        let executor_task = Dispatcher::new(
            "executor",
            request_topic.subscribe(),
            Arc::new(executor),
            dispatch,
            metrics.messaging.clone(),
        )
        .spawn(signal.clone());
        let persister_task = Dispatcher::new(
            "persister",
            outcome_topic.subscribe(),
            Arc::new(persister),
            dispatch,
            metrics.messaging.clone(),
        )
        .spawn(signal.clone());
        let sweeper_task =
            RetentionSweeper::from_config(Arc::clone(&store), &config.store).spawn(signal);

        let submitter = Submitter::new(
            request_topic,
            store,
            PollStrategy::from_config(&config.submitter),
            metrics.relay.clone(),
            metrics.messaging.clone(),
        );

        log_relay_event(
            Some(&LogContext::component("relay")),
            "relay.started",
            "executor, persister, and retention sweeper running",
            EventOutcome::Success,
        );
        Ok(RelayHandle {
            submitter,
            registry,
            metrics,
            shutdown,
            tasks: vec![executor_task, persister_task, sweeper_task],
        })
    }

    /// Start a relay over two in-process topics and the configured store backend.
    pub async fn in_memory(config: &AppConfig, engine: Arc<dyn ExecutionEngine>) -> Result<RelayHandle> {
        let requests = Arc::new(InMemoryTopic::new(config.topics.request.as_str()));
        let outcomes = Arc::new(InMemoryTopic::new(config.topics.outcome.as_str()));
        let store = corelay_store::open(&config.store)
            .await
            .context("failed to open correlation store")?;
        Self::start(config, requests, outcomes, store, engine).await
    }
}

/// Running relay. Dropping the handle also stops the background tasks.
pub struct RelayHandle {
    submitter: Submitter,
    registry: Registry,
    metrics: MetricsBundle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// A submitter bound to this relay's request topic and store.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Registry holding the relay's metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Relay, messaging and store counters, readable even when export is disabled.
    pub fn metrics(&self) -> &MetricsBundle {
        &self.metrics
    }

    /// Stop consuming and wait for in-flight handlers to settle.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.await.context("relay task failed")?;
        }
        log_relay_event(
            Some(&LogContext::component("relay")),
            "relay.stopped",
            "background tasks drained",
            EventOutcome::Success,
        );
        Ok(())
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
