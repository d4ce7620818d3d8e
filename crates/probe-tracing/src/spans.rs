//! Span builder macros for cors-probe instrumentation.

/// Span around one inbound request handled by the relay.
///
/// Usage: `let span = relay_request_span!(correlation_id, method, path);`
///
/// `upstream` and `status` are recorded once the target is resolved and the
/// upstream has answered.
#[macro_export]
macro_rules! relay_request_span {
    ($correlation_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "relay_request",
            correlation_id = %$correlation_id,
            method = %$method,
            path = %$path,
            upstream = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}

/// Span for the forward to the upstream target.
///
/// `body_ms` is recorded when the response body has finished streaming back
/// to the caller, `captured_bytes` when the capture snapshot is taken.
#[macro_export]
macro_rules! upstream_forward_span {
    ($correlation_id:expr, $target:expr) => {
        tracing::info_span!(
            "upstream_forward",
            correlation_id = %$correlation_id,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            body_ms = tracing::field::Empty,
            captured_bytes = tracing::field::Empty,
        )
    };
}

/// Span for evaluating one run's captured exchanges.
#[macro_export]
macro_rules! evaluate_span {
    ($correlation_id:expr) => {
        tracing::info_span!(
            "evaluate_run",
            correlation_id = %$correlation_id,
            exchange_count = tracing::field::Empty,
            filtered_count = tracing::field::Empty,
            failed = tracing::field::Empty,
        )
    };
}

/// Span for waiting on a run to settle before evaluation.
#[macro_export]
macro_rules! settle_span {
    ($correlation_id:expr, $mode:expr) => {
        tracing::info_span!(
            "settle_run",
            correlation_id = %$correlation_id,
            mode = ?$mode,
            outcome = tracing::field::Empty,
            waited_ms = tracing::field::Empty,
        )
    };
}
