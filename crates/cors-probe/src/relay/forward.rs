//! Forwarding to the upstream target.
//!
//! The response body streams back verbatim (including any content
//! encoding); a decoded copy is captured alongside through `CaptureBody`.

use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::Instrument;

use super::capture::{body_text, capture_headers, CaptureBody, PendingCapture};
use super::correlation::CORRELATION_HEADER;
use super::sink::{CaptureRecord, CaptureSink};
use crate::error::RelayError;
use crate::model::{Exchange, Request};

/// Headers that should NOT be forwarded (hop-by-hop headers).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Inbound headers minus hop-by-hop and `content-length` (the client
/// recomputes it from the body).
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Forward one request to `url` and stream the upstream response back.
///
/// With a correlation id the exchange is captured: request-only when the
/// upstream cannot be reached, otherwise once the response body finishes.
/// The captured copy keeps at most `capture_limit` body bytes.
#[allow(clippy::too_many_arguments)]
pub async fn forward(
    client: &reqwest::Client,
    sink: &CaptureSink,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
    correlation_id: Option<&str>,
    capture_limit: usize,
) -> Response {
    let span = probe_tracing::upstream_forward_span!(correlation_id.unwrap_or("-"), url);
    let start = Instant::now();

    async {
        let outbound_headers = forwardable_headers(headers);

        let captured_request = correlation_id.map(|_| Request {
            method: method.to_string(),
            url: url.to_string(),
            headers: capture_headers(&outbound_headers),
            body: body_text(&body),
        });

        let mut req_builder = client.request(method, url).headers(outbound_headers);
        if !body.is_empty() {
            req_builder = req_builder.body(body);
        }

        let upstream_resp = match req_builder.send().await.map_err(RelayError::from) {
            Ok(resp) => resp,
            Err(e) => {
                let latency = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("latency_ms", latency);

                if let (Some(id), Some(request)) = (correlation_id, captured_request) {
                    sink.submit(CaptureRecord {
                        correlation_id: id.to_string(),
                        exchange: Exchange {
                            request: Some(request),
                            response: None,
                        },
                    });
                }
                return error_response(&e, correlation_id);
            }
        };

        let status = upstream_resp.status();
        let latency = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency);
        tracing::Span::current().record("status", status.as_u16());

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency,
            "Forward complete"
        );

        let mut response_builder = Response::builder().status(status);

        for (name, value) in upstream_resp.headers().iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            response_builder = response_builder.header(name, value);
        }

        if let Some(id) = correlation_id {
            if let Ok(value) = HeaderValue::from_str(id) {
                response_builder = response_builder.header(CORRELATION_HEADER, value);
            }
        }

        let pending = match (correlation_id, captured_request) {
            (Some(id), Some(request)) => Some(PendingCapture {
                correlation_id: id.to_string(),
                request,
                status: status.as_u16(),
                headers: capture_headers(upstream_resp.headers()),
                content_encoding: upstream_resp
                    .headers()
                    .get(header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body_limit: capture_limit,
                sink: sink.clone(),
            }),
            _ => None,
        };

        let expected_len = upstream_resp.content_length();
        let body = CaptureBody::new(
            upstream_resp.bytes_stream(),
            expected_len,
            pending,
            tracing::Span::current(),
            start,
        );

        response_builder
            .body(Body::from_stream(body))
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build response");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            })
    }
    .instrument(span)
    .await
}

/// Best-effort answer when the upstream could not be reached.
fn error_response(error: &RelayError, correlation_id: Option<&str>) -> Response {
    let (status, message) = match error {
        RelayError::UpstreamTimeout(_) => {
            tracing::error!(error = %error, "Upstream timeout");
            (StatusCode::GATEWAY_TIMEOUT, "upstream timeout")
        }
        _ => {
            tracing::error!(error = %error, "Upstream connection error");
            (StatusCode::BAD_GATEWAY, "upstream connection error")
        }
    };
    tracing::Span::current().record("status", status.as_u16());

    let mut response = (status, message).into_response();
    if let Some(value) = correlation_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwardable_headers_drop_framing() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("api.test"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("origin", HeaderValue::from_static("http://front.test"));
        headers.insert(
            "access-control-request-method",
            HeaderValue::from_static("PUT"),
        );
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("run-1"));

        let out = forwardable_headers(&headers);
        assert_eq!(out.len(), 3);
        assert!(out.contains_key("origin"));
        assert!(out.contains_key("access-control-request-method"));
        assert!(out.contains_key(CORRELATION_HEADER));
        assert!(!out.contains_key("content-length"));
    }
}
