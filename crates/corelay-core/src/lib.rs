//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Relay components and lifecycle wiring."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! Correlation-based request/response over fire-and-forget topics.
//!
//! A [`Submitter`] broadcasts a request and polls the correlation store; the
//! [`Executor`] runs it against the [`ExecutionEngine`] and publishes an
//! outcome; the [`Persister`] writes that outcome into the store.
#![warn(missing_docs)]

pub mod engine;
pub mod executor;
pub mod metrics;
pub mod persister;
pub mod poll;
pub mod publisher;
pub mod relay;
pub mod submitter;

pub use engine::{EngineError, EngineRequest, ExecutionEngine, HttpEngine};
pub use executor::Executor;
pub use metrics::{MetricsBundle, RelayMetrics};
pub use persister::Persister;
pub use poll::PollStrategy;
pub use publisher::OutcomePublisher;
pub use relay::{Relay, RelayHandle};
pub use submitter::{Outcome, SubmitError, Submission, Submitter};
