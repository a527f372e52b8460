//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Prometheus metrics for submissions and outcomes."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::time::Duration;

use corelay_msg::{MessagingMetrics, OperationResult};
use corelay_store::StoreMetrics;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Relay-level counters and the submit wait histogram.
#[derive(Clone)]
pub struct RelayMetrics {
    submitted: IntCounter,
    outcomes: IntCounterVec,
    timeouts: IntCounter,
    wait: Histogram,
}

impl RelayMetrics {
    /// Register relay metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.submitted.clone()))?;
        registry.register(Box::new(metrics.outcomes.clone()))?;
        registry.register(Box::new(metrics.timeouts.clone()))?;
        registry.register(Box::new(metrics.wait.clone()))?;
        Ok(metrics)
    }

    /// Metrics that are recorded but not exported.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        let submitted = IntCounter::with_opts(Opts::new(
            "corelay_requests_submitted_total",
            "Request envelopes broadcast by submitters",
        ))?;
        let outcomes = IntCounterVec::new(
            Opts::new(
                "corelay_outcomes_total",
                "Outcome envelopes produced by executors, by status",
            ),
            &["status"],
        )?;
        let timeouts = IntCounter::with_opts(Opts::new(
            "corelay_submit_timeouts_total",
            "Submissions that exhausted their poll budget",
        ))?;
        let wait = Histogram::with_opts(
            HistogramOpts::new(
                "corelay_submit_wait_seconds",
                "Time between broadcast and the end of the wait",
            )
            .buckets(prometheus::exponential_buckets(0.05, 2.0, 12)?),
        )?;
        Ok(Self {
            submitted,
            outcomes,
            timeouts,
            wait,
        })
    }

    /// Record a broadcast request.
    pub fn observe_submitted(&self) {
        self.submitted.inc();
    }

    /// Record an outcome produced by an executor.
    pub fn observe_outcome(&self, result: &OperationResult) {
        self.outcomes
            .with_label_values(&[result.status_label()])
            .inc();
    }

    /// Record an exhausted poll budget.
    pub fn observe_timeout(&self) {
        self.timeouts.inc();
    }

    /// Record how long a submitter waited.
    pub fn observe_wait(&self, waited: Duration) {
        self.wait.observe(waited.as_secs_f64());
    }

    /// Outcomes recorded under `status`.
    pub fn outcomes(&self, status: &str) -> u64 {
        self.outcomes.with_label_values(&[status]).get()
    }

    /// Timeouts recorded so far.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.get()
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayMetrics").finish_non_exhaustive()
    }
}

/// Every metric family the relay records, sharing one registry.
#[derive(Clone, Debug)]
pub struct MetricsBundle {
    /// Relay-level metrics.
    pub relay: RelayMetrics,
    /// Topic traffic.
    pub messaging: MessagingMetrics,
    /// Store access.
    pub store: StoreMetrics,
}

impl MetricsBundle {
    /// Register every family on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            relay: RelayMetrics::register(registry)?,
            messaging: MessagingMetrics::register(registry)?,
            store: StoreMetrics::register(registry)?,
        })
    }

    /// Metrics that are recorded but not exported.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Ok(Self {
            relay: RelayMetrics::unregistered()?,
            messaging: MessagingMetrics::unregistered()?,
            store: StoreMetrics::unregistered()?,
        })
    }
}
