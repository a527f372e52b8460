//! ---
//! corelay_section: "03-persistence-logging"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Structured logging context and sinks for relay components."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
/// Emit an informational log enriched with relay request context.
#[macro_export]
macro_rules! relay_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::INFO,
            request_id = ctx.request_id.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            component = ctx.component.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tracing::event!(
            $crate::tracing::Level::INFO,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with relay request context.
#[macro_export]
macro_rules! relay_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::DEBUG,
            request_id = ctx.request_id.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            component = ctx.component.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tracing::event!(
            $crate::tracing::Level::DEBUG,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning log enriched with relay request context.
#[macro_export]
macro_rules! relay_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::WARN,
            request_id = ctx.request_id.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            component = ctx.component.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tracing::event!(
            $crate::tracing::Level::WARN,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with relay request context.
#[macro_export]
macro_rules! relay_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $crate::tracing::Level::ERROR,
            request_id = ctx.request_id.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            component = ctx.component.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tracing::event!(
            $crate::tracing::Level::ERROR,
            message = %format_args!($($arg)+)
        );
    }};
}
