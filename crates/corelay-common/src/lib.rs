//! ---
//! corelay_section: "01-core-functionality"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Shared primitives and utilities for the relay runtime."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
//! Shared primitives for the Corelay workspace: configuration loading,
//! tracing bootstrap, and timestamp helpers.
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, EngineBodyStyle, EngineConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    PollStrategyKind, StoreBackend, StoreConfig, SubmitterConfig, TopicsConfig, WorkerConfig,
};
pub use logging::{init_tracing, LogFormat};
