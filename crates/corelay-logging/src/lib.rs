//! ---
//! corelay_section: "03-persistence-logging"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Structured logging context and sinks for relay components."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Request-scoped logging helpers. Every relay component logs through a
//! [`LogContext`] so events for one request can be joined on `request_id`.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for tests and examples.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Correlation identifier of the request being handled.
    pub request_id: Option<&'a str>,
    /// Root operation name, once classified.
    pub operation: Option<&'a str>,
    /// Relay component emitting the event (submitter, executor, ...).
    pub component: Option<&'a str>,
    /// Delivery or poll attempt number.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for the named component.
    pub fn component(component: &'a str) -> Self {
        Self {
            component: Some(component),
            ..Self::default()
        }
    }

    /// Attach a request identifier.
    pub fn with_request(mut self, request_id: &'a str) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Attach an operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attach an attempt counter.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// High-level outcome used when emitting relay lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed but the relay recovered (e.g. a failure outcome was published).
    Degraded,
    /// The step failed and work was lost or abandoned.
    Fault,
}

impl EventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::Degraded => "degraded",
            EventOutcome::Fault => "fault",
        }
    }

    /// Log level used for events with this outcome.
    pub fn level(&self) -> Level {
        match self {
            EventOutcome::Success => Level::INFO,
            EventOutcome::Degraded => Level::WARN,
            EventOutcome::Fault => Level::ERROR,
        }
    }
}

/// Emit a standardized relay event with an outcome classification.
pub fn log_relay_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: EventOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    let outcome_str = outcome.as_str();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome_str,
                request_id = ctx.request_id.unwrap_or(""),
                operation = ctx.operation.unwrap_or(""),
                component = ctx.component.unwrap_or(""),
                attempt = ctx.attempt.unwrap_or_default(),
                message = %message
            )
        };
    }
    // event! needs a constant level per call site
    match outcome {
        EventOutcome::Fault => emit!(Level::ERROR),
        EventOutcome::Degraded => emit!(Level::WARN),
        EventOutcome::Success => emit!(Level::INFO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::component("executor")
            .with_request("req-1")
            .with_operation("login");
        relay_info!(context = ctx.clone(), "request accepted");
        relay_debug!("debug message");
        relay_warn!(context = ctx.clone().with_attempt(2), "redelivered");
        relay_error!(context = ctx, "engine failed: {}", "boom");
    }

    #[test]
    fn relay_event_helper_emits() {
        init();
        let ctx = LogContext::component("persister").with_request("req-2");
        log_relay_event(Some(&ctx), "record.stored", "stored", EventOutcome::Success);
        log_relay_event(None, "record.dropped", "no request id", EventOutcome::Fault);
        log_relay_event(Some(&ctx), "outcome.failure", "unauthenticated", EventOutcome::Degraded);
    }

    #[test]
    fn outcome_levels() {
        assert_eq!(EventOutcome::Success.level(), Level::INFO);
        assert_eq!(EventOutcome::Degraded.level(), Level::WARN);
        assert_eq!(EventOutcome::Fault.as_str(), "fault");
    }
}
