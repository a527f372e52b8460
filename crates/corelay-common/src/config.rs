//! ---
//! corelay_section: "01-core-functionality"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Relay configuration model, loading, and validation."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_request_topic() -> String {
    "relay-requests".to_owned()
}

fn default_outcome_topic() -> String {
    "relay-outcomes".to_owned()
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_max_delay() -> Duration {
    Duration::from_secs(16)
}

fn default_poll_multiplier() -> f64 {
    2.0
}

fn default_max_in_flight() -> usize {
    16
}

fn default_max_redeliveries() -> u8 {
    3
}

fn default_redelivery_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_engine_endpoint() -> String {
    "http://127.0.0.1:4000/".to_owned()
}

fn default_engine_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_store_directory() -> PathBuf {
    PathBuf::from("target/corelay/records")
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for a relay deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// `[topics]`
    #[serde(default)]
    pub topics: TopicsConfig,
    /// `[submitter]`
    #[serde(default)]
    pub submitter: SubmitterConfig,
    /// `[worker]`
    #[serde(default)]
    pub worker: WorkerConfig,
    /// `[engine]`
    #[serde(default)]
    pub engine: EngineConfig,
    /// `[store]`
    #[serde(default)]
    pub store: StoreConfig,
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingConfig,
    /// `[metrics]`
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    /// Parsed and validated configuration.
    pub config: AppConfig,
    /// File the configuration was read from.
    pub source: PathBuf,
}

impl AppConfig {
    /// Environment variable naming a configuration file that overrides the candidates.
    pub const ENV_CONFIG_PATH: &'static str = "CORELAY_CONFIG";

    /// Load configuration from disk, respecting the `CORELAY_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.topics.validate()?;
        self.submitter.validate()?;
        self.worker.validate()?;
        self.engine.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Names of the two pub/sub topics the relay is wired to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicsConfig {
    /// Topic carrying request envelopes.
    #[serde(default = "default_request_topic")]
    pub request: String,
    /// Topic carrying outcome envelopes.
    #[serde(default = "default_outcome_topic")]
    pub outcome: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            request: default_request_topic(),
            outcome: default_outcome_topic(),
        }
    }
}

impl TopicsConfig {
    /// Both names must be non-empty and distinct.
    pub fn validate(&self) -> Result<()> {
        if self.request.trim().is_empty() || self.outcome.trim().is_empty() {
            return Err(anyhow!("topic names must not be empty"));
        }
        if self.request == self.outcome {
            return Err(anyhow!(
                "request and outcome topics must differ (both are '{}')",
                self.request
            ));
        }
        Ok(())
    }
}

/// Wait strategy used by submitters while polling for an outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategyKind {
    /// Same delay before every read.
    #[default]
    Fixed,
    /// Delay grows by `multiplier` up to `max_delay`.
    Exponential,
}

/// Polling budget for submitters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitterConfig {
    /// Wait strategy between reads.
    #[serde(default)]
    pub strategy: PollStrategyKind,
    /// Number of store reads before a submit times out.
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,
    /// Delay before the first read (and every read, for the fixed strategy).
    #[serde(default = "default_poll_delay", rename = "delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub delay: Duration,
    /// Cap for exponential delays.
    #[serde(default = "default_poll_max_delay", rename = "max_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    /// Growth factor for exponential delays.
    #[serde(default = "default_poll_multiplier")]
    pub multiplier: f64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            strategy: PollStrategyKind::default(),
            attempts: default_poll_attempts(),
            delay: default_poll_delay(),
            max_delay: default_poll_max_delay(),
            multiplier: default_poll_multiplier(),
        }
    }
}

impl SubmitterConfig {
    /// Reject an empty budget or a shrinking exponential schedule.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(anyhow!("submitter.attempts must be at least 1"));
        }
        if self.strategy == PollStrategyKind::Exponential {
            if !self.multiplier.is_finite() || self.multiplier < 1.0 {
                return Err(anyhow!(
                    "submitter.multiplier must be a finite value >= 1.0, got {}",
                    self.multiplier
                ));
            }
            if self.max_delay < self.delay {
                return Err(anyhow!("submitter.max_delay_ms must be >= submitter.delay_ms"));
            }
        }
        Ok(())
    }
}

/// Dispatcher settings shared by the executor and the persister.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Deliveries handled concurrently per consumer.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Redeliveries after a negative acknowledgement before the message is dropped.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u8,
    /// Pause before a redelivery.
    #[serde(default = "default_redelivery_interval", rename = "redelivery_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub redelivery_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_redeliveries: default_max_redeliveries(),
            redelivery_interval: default_redelivery_interval(),
        }
    }
}

impl WorkerConfig {
    /// At least one delivery must be allowed in flight.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(anyhow!("worker.max_in_flight must be at least 1"));
        }
        Ok(())
    }
}

/// Request body layout understood by the internal execution engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineBodyStyle {
    /// `{"operation": ..., "parameters": ...}`
    #[default]
    Relay,
    /// `{"query": ..., "variables": ...}`
    Graphql,
}

/// Internal execution engine connection.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// HTTP endpoint of the engine.
    #[serde(default = "default_engine_endpoint")]
    pub endpoint: String,
    /// Upper bound on a single engine call.
    #[serde(default = "default_engine_timeout", rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Request body layout.
    #[serde(default)]
    pub body_style: EngineBodyStyle,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_engine_endpoint(),
            timeout: default_engine_timeout(),
            body_style: EngineBodyStyle::default(),
        }
    }
}

impl EngineConfig {
    /// Parse the configured endpoint.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("engine.endpoint '{}' is not a valid URL", self.endpoint))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(anyhow!(
                "engine.endpoint must use http or https, got '{}'",
                other
            )),
        }
    }

    /// Endpoint must parse as http(s) and the timeout must be non-zero.
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.timeout.is_zero() {
            return Err(anyhow!("engine.timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

/// Storage backend holding correlation records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; records vanish on restart.
    #[default]
    Memory,
    /// One JSON file per record under `directory`.
    File,
}

/// Correlation store settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Record directory for the file backend.
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
    /// Records older than this are purged by the retention sweeper. Zero disables expiry.
    #[serde(default = "default_retention", rename = "retention_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retention: Duration,
    /// Pause between retention sweeps.
    #[serde(default = "default_sweep_interval", rename = "sweep_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            directory: default_store_directory(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    /// File backends need a directory; retention needs a sweep interval.
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::File && self.directory.as_os_str().is_empty() {
            return Err(anyhow!("store.directory is required for the file backend"));
        }
        if !self.retention.is_zero() && self.sweep_interval.is_zero() {
            return Err(anyhow!(
                "store.sweep_interval_secs must be at least 1 when retention is enabled"
            ));
        }
        Ok(())
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory for rolling log files.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Line format.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log file name prefix; defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Prometheus export settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Register relay metrics on the relay's registry.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}
