//! Correlation token carried by every request of a run.
//!
//! Drivers tag traffic with a dedicated header or, when headers cannot be
//! set (e.g. plain navigations), with a query parameter.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the run's correlation id.
pub const CORRELATION_HEADER: &str = "x-cors-probe-run";

/// Query parameter fallback; stripped before forwarding.
pub const CORRELATION_QUERY_PARAM: &str = "cors_probe_run";

/// Generate a new correlation id (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation id found on an inbound request plus the query string to
/// forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub correlation_id: Option<String>,
    pub query: Option<String>,
}

/// Pull the correlation id off an inbound request. The header wins over the
/// query parameter; the parameter is removed from the forwarded query either
/// way.
pub fn extract(headers: &HeaderMap, query: Option<&str>) -> Tagged {
    let from_header = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut from_query = None;
    let mut kept: Vec<&str> = Vec::new();
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        // Other pairs are forwarded untouched; only ours is decoded.
        match form_urlencoded::parse(pair.as_bytes()).next() {
            Some((key, value)) if key == CORRELATION_QUERY_PARAM => {
                let value = value.trim();
                if from_query.is_none() && !value.is_empty() {
                    from_query = Some(value.to_string());
                }
            }
            _ => kept.push(pair),
        }
    }

    Tagged {
        correlation_id: from_header.or(from_query),
        query: (!kept.is_empty()).then(|| kept.join("&")),
    }
}
