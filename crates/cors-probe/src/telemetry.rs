//! OpenTelemetry span attributes for CORS verdicts.
//!
//! Attributes land on the OTel span behind the current `tracing` span so
//! trace backends can filter runs by outcome (`cors.origin.valid = false`).

use opentelemetry::{Key, Value};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::model::ComplianceSummary;

fn set_str(span: &Span, key: impl Into<Key>, value: impl Into<String>) {
    span.set_attribute(key, Value::String(value.into().into()));
}

fn set_bool(span: &Span, key: impl Into<Key>, value: bool) {
    span.set_attribute(key, Value::Bool(value));
}

fn set_i64(span: &Span, key: impl Into<Key>, value: i64) {
    span.set_attribute(key, Value::I64(value));
}

/// Record a computed verdict on `span`.
pub fn record_summary(span: &Span, summary: &ComplianceSummary, exchange_count: usize) {
    set_bool(span, "cors.preflight", summary.is_preflight);
    set_bool(span, "cors.origin.valid", summary.origin.is_valid);
    set_bool(span, "cors.method.valid", summary.method.is_valid);
    set_bool(span, "cors.headers.valid", summary.headers.is_valid);
    set_i64(
        span,
        "cors.exchange_count",
        i64::try_from(exchange_count).unwrap_or(i64::MAX),
    );

    if let Some(origin) = summary.origin.requested.as_deref() {
        set_str(span, "cors.origin.requested", origin);
    }
    if let Some(method) = summary.method.requested.as_deref() {
        set_str(span, "cors.method.requested", method);
    }
}

/// Record why a run produced no verdict.
pub fn record_failure(span: &Span, error: &str) {
    set_bool(span, "cors.failed", true);
    set_str(span, "cors.error", error);
}
