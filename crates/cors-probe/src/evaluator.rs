//! CORS compliance verdicts over a run's captured exchanges.
//!
//! The verdict is taken from the first exchange left after navigation
//! filtering: for a preflighted request that is the `OPTIONS` exchange, for
//! a simple request it is the request itself.

use tracing::Instrument;

use crate::classifier::HeaderClassifier;
use crate::diagram::DiagramRenderer;
use crate::error::RunFailure;
use crate::model::{ComplianceSummary, Exchange, ExchangeSequence, RunResult};
use crate::store::{read_all_blocking, SharedStore};
use crate::telemetry;

const ORIGIN: &str = "Origin";
const REQUEST_METHOD: &str = "Access-Control-Request-Method";
const REQUEST_HEADERS: &str = "Access-Control-Request-Headers";
const ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
const ALLOW_METHODS: &str = "Access-Control-Allow-Methods";
const ALLOW_HEADERS: &str = "Access-Control-Allow-Headers";

/// Methods that never need a preflight grant.
const SIMPLE_METHODS: &[&str] = &["GET", "POST", "HEAD"];

/// Drop exchanges that loaded the driving page itself (request URL starts
/// with `driver_origin`). Exchanges without a request are kept, and an empty
/// `driver_origin` filters nothing.
pub fn filter_navigation(exchanges: ExchangeSequence, driver_origin: &str) -> ExchangeSequence {
    if driver_origin.is_empty() {
        return exchanges;
    }
    exchanges
        .into_iter()
        .filter(|e| {
            e.request
                .as_ref()
                .map_or(true, |req| !req.url.starts_with(driver_origin))
        })
        .collect()
}

/// Browsers send the preflight method in uppercase; anything else is not a
/// preflight.
pub fn is_preflight(exchange: &Exchange) -> bool {
    exchange
        .request
        .as_ref()
        .is_some_and(|req| req.method == "OPTIONS")
}

/// Three-part verdict for one exchange.
pub fn summarize(exchange: &Exchange) -> ComplianceSummary {
    let mut summary = ComplianceSummary {
        is_preflight: is_preflight(exchange),
        ..ComplianceSummary::default()
    };

    let request = exchange.request.as_ref();
    let response = exchange.response.as_ref();

    summary.origin.requested = request.and_then(|r| r.header(ORIGIN)).map(str::to_string);
    summary.method.requested = request
        .and_then(|r| r.header(REQUEST_METHOD))
        .map(str::to_string);
    summary.headers.requested = request
        .and_then(|r| r.header(REQUEST_HEADERS))
        .map(str::to_string);
    summary.origin.received = response
        .and_then(|r| r.header(ALLOW_ORIGIN))
        .map(str::to_string);
    summary.method.received = response
        .and_then(|r| r.header(ALLOW_METHODS))
        .map(str::to_string);
    summary.headers.received = response
        .and_then(|r| r.header(ALLOW_HEADERS))
        .map(str::to_string);

    let Some(request) = request else {
        return summary;
    };
    if response.is_none() {
        return summary;
    }

    summary.origin.is_valid = origin_valid(
        summary.origin.requested.as_deref(),
        summary.origin.received.as_deref(),
    );
    summary.method.is_valid = method_valid(
        &request.method,
        summary.method.requested.as_deref(),
        summary.method.received.as_deref(),
    );
    summary.headers.is_valid = headers_valid(
        summary.headers.requested.as_deref(),
        summary.headers.received.as_deref(),
    );

    summary
}

fn origin_valid(requested: Option<&str>, received: Option<&str>) -> bool {
    match (requested, received) {
        (Some(requested), Some(received)) => {
            received == "*" || received.eq_ignore_ascii_case(requested)
        }
        _ => false,
    }
}

fn method_valid(own_method: &str, requested: Option<&str>, received: Option<&str>) -> bool {
    match (requested, received) {
        (Some(requested), Some(received)) => received
            .split(',')
            .map(str::trim)
            .any(|m| m.eq_ignore_ascii_case(requested.trim())),
        (None, _) if SIMPLE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(own_method)) => true,
        _ => {
            tracing::debug!(
                method = %own_method,
                requested = ?requested,
                received = ?received,
                "No rule decides method validity, treating as invalid"
            );
            false
        }
    }
}

fn headers_valid(requested: Option<&str>, received: Option<&str>) -> bool {
    match (requested, received) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(requested), Some(received)) => {
            let allowed: Vec<&str> = received.split(',').map(str::trim).collect();
            requested
                .split(',')
                .map(str::trim)
                .all(|name| allowed.iter().any(|a| a.eq_ignore_ascii_case(name)))
        }
    }
}

/// Turns captured exchanges into a `RunResult`.
#[derive(Debug, Clone)]
pub struct Evaluator {
    classifier: HeaderClassifier,
    renderer: DiagramRenderer,
    actor_a: String,
    actor_b: String,
}

impl Evaluator {
    pub fn new(classifier: HeaderClassifier, actor_a: &str, actor_b: &str) -> Self {
        Self {
            renderer: DiagramRenderer::new(classifier.clone()),
            classifier,
            actor_a: actor_a.to_string(),
            actor_b: actor_b.to_string(),
        }
    }

    /// Evaluate an already-loaded sequence.
    pub fn evaluate_exchanges(
        &self,
        exchanges: ExchangeSequence,
        driver_origin: &str,
    ) -> Result<RunResult, RunFailure> {
        if exchanges.is_empty() {
            return Err(RunFailure::EmptyCapture);
        }

        let captured = exchanges.len();
        let mut exchanges = filter_navigation(exchanges, driver_origin);
        tracing::Span::current().record("filtered_count", (captured - exchanges.len()) as u64);

        let Some(first) = exchanges.first() else {
            return Err(RunFailure::EmptyCapture);
        };
        let summary = summarize(first);

        for exchange in exchanges.iter_mut() {
            self.classifier.highlight_exchange(exchange);
        }

        let diagram = self
            .renderer
            .mermaid_document(&exchanges, &self.actor_a, &self.actor_b);

        telemetry::record_summary(&tracing::Span::current(), &summary, exchanges.len());

        Ok(RunResult {
            exchanges,
            summary: Some(summary),
            diagram: Some(diagram),
            console_log: Vec::new(),
            failed: false,
            error: None,
        })
    }

    /// Read a run from the store and evaluate it. Failures come back as a
    /// `RunResult` with `failed = true`.
    pub async fn evaluate_run(
        &self,
        store: SharedStore,
        correlation_id: &str,
        driver_origin: &str,
    ) -> RunResult {
        let span = probe_tracing::evaluate_span!(correlation_id);

        async {
            let outcome = match read_all_blocking(store, correlation_id.to_string()).await {
                Ok(exchanges) => {
                    tracing::Span::current().record("exchange_count", exchanges.len() as u64);
                    self.evaluate_exchanges(exchanges, driver_origin)
                }
                Err(e) => Err(RunFailure::from(e)),
            };

            match outcome {
                Ok(result) => {
                    tracing::Span::current().record("failed", false);
                    tracing::info!(
                        exchanges = result.exchanges.len(),
                        "Run evaluated"
                    );
                    result
                }
                Err(failure) => {
                    let span = tracing::Span::current();
                    span.record("failed", true);
                    telemetry::record_failure(&span, &failure.to_string());
                    tracing::warn!(error = %failure, "Run produced no verdict");
                    RunResult::failure(failure)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(HeaderClassifier::default(), "Browser", "API")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Header, Request, Response};
    use crate::store::MemoryStore;

    fn exchange(
        method: &str,
        url: &str,
        request_headers: &[(&str, &str)],
        status: u16,
        response_headers: &[(&str, &str)],
    ) -> Exchange {
        Exchange {
            request: Some(Request {
                method: method.into(),
                url: url.into(),
                headers: request_headers
                    .iter()
                    .map(|(k, v)| Header::new(*k, *v))
                    .collect(),
                body: None,
            }),
            response: Some(Response {
                status,
                headers: response_headers
                    .iter()
                    .map(|(k, v)| Header::new(*k, *v))
                    .collect(),
                body: None,
                body_truncated: false,
            }),
        }
    }

    #[test]
    fn test_scenario_simple_open() {
        let ex = exchange(
            "GET",
            "http://api.test/allorigins",
            &[("Origin", "http://front.test")],
            200,
            &[("Access-Control-Allow-Origin", "*")],
        );
        let summary = summarize(&ex);
        assert!(!summary.is_preflight);
        assert!(summary.origin.is_valid);
        assert_eq!(summary.origin.requested.as_deref(), Some("http://front.test"));
        assert_eq!(summary.origin.received.as_deref(), Some("*"));
        assert!(summary.method.is_valid);
        assert!(summary.headers.is_valid);
    }

    #[test]
    fn test_scenario_preflight_success() {
        let ex = exchange(
            "OPTIONS",
            "http://api.test/restricted",
            &[
                ("Origin", "http://front.test"),
                ("Access-Control-Request-Method", "PUT"),
                ("Access-Control-Request-Headers", "x-custom-header"),
            ],
            204,
            &[
                ("Access-Control-Allow-Origin", "http://front.test"),
                ("Access-Control-Allow-Methods", "GET,PUT"),
                ("Access-Control-Allow-Headers", "x-custom-header"),
            ],
        );
        let summary = summarize(&ex);
        assert!(summary.is_preflight);
        assert!(summary.origin.is_valid);
        assert!(summary.method.is_valid);
        assert!(summary.headers.is_valid);
    }

    #[test]
    fn test_scenario_preflight_header_mismatch() {
        let ex = exchange(
            "OPTIONS",
            "http://api.test/restricted",
            &[
                ("Origin", "http://front.test"),
                ("Access-Control-Request-Method", "PUT"),
                ("Access-Control-Request-Headers", "x-other-custom-header"),
            ],
            204,
            &[
                ("Access-Control-Allow-Origin", "http://front.test"),
                ("Access-Control-Allow-Methods", "GET, PUT"),
                ("Access-Control-Allow-Headers", "x-custom-header"),
            ],
        );
        let summary = summarize(&ex);
        assert!(summary.origin.is_valid);
        assert!(summary.method.is_valid);
        assert!(!summary.headers.is_valid);
    }

    #[test]
    fn test_scenario_forbidden_origin() {
        let ex = exchange(
            "GET",
            "http://api.test/closed",
            &[("Origin", "http://front.test")],
            200,
            &[],
        );
        let summary = summarize(&ex);
        assert!(!summary.origin.is_valid);
        assert_eq!(summary.origin.received, None);
        assert!(summary.method.is_valid);
        assert!(summary.headers.is_valid);
    }

    #[tokio::test]
    async fn test_scenario_empty_capture() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let result = Evaluator::default()
            .evaluate_run(store, "never-used", "")
            .await;
        assert!(result.failed);
        assert_eq!(result.error.as_deref(), Some("no exchanges captured"));
        assert!(result.summary.is_none());
        assert!(result.diagram.is_none());
    }

    #[test]
    fn test_origin_comparison_is_case_insensitive() {
        assert!(origin_valid(Some("http://Front.Test"), Some("http://front.test")));
        assert!(!origin_valid(Some("http://front.test"), Some("http://other.test")));
        assert!(!origin_valid(None, Some("*")));
    }

    #[test]
    fn test_headers_wildcard_is_literal() {
        assert!(!headers_valid(Some("x-custom-header"), Some("*")));
        assert!(headers_valid(Some("*"), Some("*")));
        assert!(headers_valid(
            Some("X-Custom-Header, content-type"),
            Some("content-type,x-custom-header")
        ));
        assert!(!headers_valid(Some("x-a"), None));
    }

    #[test]
    fn test_uncovered_method_combination_defaults_invalid() {
        // PUT without a preceding preflight record.
        assert!(!method_valid("PUT", None, None));
        // Preflight that received no allow-methods.
        assert!(!method_valid("OPTIONS", Some("PUT"), None));
        assert!(method_valid("head", None, Some("PUT")));
    }

    #[test]
    fn test_missing_response_invalidates_all_items() {
        let mut ex = exchange(
            "GET",
            "http://api.test/allorigins",
            &[("Origin", "http://front.test")],
            200,
            &[],
        );
        ex.response = None;
        let summary = summarize(&ex);
        assert_eq!(summary.origin.requested.as_deref(), Some("http://front.test"));
        assert!(!summary.origin.is_valid);
        assert!(!summary.method.is_valid);
        assert!(!summary.headers.is_valid);
    }

    #[test]
    fn test_preflight_requires_uppercase_options() {
        let ex = exchange("options", "http://api.test/", &[], 204, &[]);
        assert!(!is_preflight(&ex));
        assert!(!is_preflight(&Exchange::default()));
    }

    #[test]
    fn test_filter_navigation_is_idempotent() {
        let exchanges = vec![
            exchange("GET", "http://front.test/", &[], 200, &[]),
            exchange("GET", "http://front.test/app.js", &[], 200, &[]),
            Exchange::default(),
            exchange("GET", "http://api.test/allorigins", &[], 200, &[]),
        ];
        let once = filter_navigation(exchanges, "http://front.test");
        assert_eq!(once.len(), 2);
        let twice = filter_navigation(once.clone(), "http://front.test");
        assert_eq!(once, twice);

        let unfiltered = filter_navigation(twice.clone(), "");
        assert_eq!(unfiltered, twice);
    }

    #[tokio::test]
    async fn test_evaluate_run_filters_highlights_and_renders() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        store
            .append(
                "run",
                &exchange("GET", "http://front.test/", &[], 200, &[]),
            )
            .unwrap();
        store
            .append(
                "run",
                &exchange(
                    "GET",
                    "http://api.test/allorigins",
                    &[("Origin", "http://front.test"), ("Accept", "*/*")],
                    200,
                    &[("Access-Control-Allow-Origin", "*")],
                ),
            )
            .unwrap();

        let result = Evaluator::default()
            .evaluate_run(store, "run", "http://front.test")
            .await;

        assert!(!result.failed);
        assert_eq!(result.exchanges.len(), 1);
        let headers = &result.exchanges[0].request.as_ref().unwrap().headers;
        assert!(headers[0].highlighted);
        assert!(!headers[1].highlighted);
        assert!(result.summary.unwrap().origin.is_valid);
        let diagram = result.diagram.unwrap();
        assert!(diagram.starts_with("sequenceDiagram\n"));
        assert!(diagram.contains("Browser->>+API: GET http://api.test/allorigins"));
    }

    #[test]
    fn test_only_navigation_is_empty_capture() {
        let evaluator = Evaluator::default();
        let err = evaluator
            .evaluate_exchanges(
                vec![exchange("GET", "http://front.test/", &[], 200, &[])],
                "http://front.test",
            )
            .unwrap_err();
        assert!(matches!(err, RunFailure::EmptyCapture));
    }
}
