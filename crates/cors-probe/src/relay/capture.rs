//! Building the structured copy of relayed messages.
//!
//! A `CaptureBody` wrapper passes upstream bytes through unchanged while
//! accumulating a copy. When the stream ends (or fails, or the caller goes
//! away and the body is dropped) the copy is decoded and the finished
//! exchange is handed to the [`CaptureSink`].

use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::HeaderMap;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use futures_core::Stream;

use super::sink::{CaptureRecord, CaptureSink};
use crate::model::{Exchange, Header, Request, Response};

/// `content-type` → `Content-Type`.
pub fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Snapshot a header map, one entry per name, repeated values joined with
/// `", "`.
pub fn capture_headers(headers: &HeaderMap) -> Vec<Header> {
    headers
        .keys()
        .map(|name| {
            let value = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            Header::new(canonical_name(name.as_str()), value)
        })
        .collect()
}

/// Body bytes as text, `None` when empty.
pub fn body_text(bytes: &[u8]) -> Option<String> {
    (!bytes.is_empty()).then(|| String::from_utf8_lossy(bytes).into_owned())
}

/// Undo `Content-Encoding` for the captured copy. Unsupported or corrupt
/// encodings leave the bytes as received.
pub fn decode_body(bytes: &[u8], content_encoding: Option<&str>) -> Option<String> {
    let Some(encoding) = content_encoding else {
        return body_text(bytes);
    };

    let mut decoded = bytes.to_vec();
    // Codings are listed in the order they were applied.
    for coding in encoding.split(',').rev().map(|c| c.trim().to_ascii_lowercase()) {
        let step = match coding.as_str() {
            "" | "identity" => continue,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(decoded.as_slice())),
            "deflate" => read_all(ZlibDecoder::new(decoded.as_slice()))
                .or_else(|_| read_all(DeflateDecoder::new(decoded.as_slice()))),
            other => {
                tracing::debug!(encoding = %other, "Unsupported content encoding, capturing raw body");
                return body_text(bytes);
            }
        };
        match step {
            Ok(out) => decoded = out,
            Err(e) => {
                tracing::warn!(error = %e, encoding = %coding, "Failed to decode captured body");
                return body_text(bytes);
            }
        }
    }
    body_text(&decoded)
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Response side of a capture whose body is still streaming.
pub struct PendingCapture {
    pub correlation_id: String,
    pub request: Request,
    pub status: u16,
    pub headers: Vec<Header>,
    pub content_encoding: Option<String>,
    /// Most body bytes kept in the captured copy.
    pub body_limit: usize,
    pub sink: CaptureSink,
}

impl PendingCapture {
    fn finish(self, body: &[u8], truncated: bool, span: &tracing::Span) {
        span.record("captured_bytes", body.len() as u64);
        if truncated {
            tracing::warn!(
                parent: span,
                limit = self.body_limit,
                "Captured response body truncated"
            );
        }
        let response = Response {
            status: self.status,
            headers: self.headers,
            body: decode_body(body, self.content_encoding.as_deref()),
            body_truncated: truncated,
        };
        self.sink.submit(CaptureRecord {
            correlation_id: self.correlation_id,
            exchange: Exchange {
                request: Some(self.request),
                response: Some(response),
            },
        });
    }
}

/// Stream wrapper that tees upstream bytes into a capture buffer.
///
/// With a known body length the capture is submitted as soon as the last
/// byte arrives, before that chunk is handed on. The caller therefore never
/// holds the complete body while its capture is still unsubmitted.
pub struct CaptureBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    received: u64,
    expected_len: Option<u64>,
    truncated: bool,
    pending: Option<PendingCapture>,
    span: tracing::Span,
    start: Instant,
}

impl CaptureBody {
    /// Wrap `inner`, whose total length is `expected_len` when known. With
    /// `pending = None` the bytes pass through and nothing is captured.
    pub fn new(
        inner: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        expected_len: Option<u64>,
        pending: Option<PendingCapture>,
        span: tracing::Span,
        start: Instant,
    ) -> Self {
        let mut body = Self {
            inner: Box::pin(inner),
            buffer: Vec::new(),
            received: 0,
            expected_len,
            truncated: false,
            pending,
            span,
            start,
        };
        if expected_len == Some(0) {
            body.finish();
        }
        body
    }

    fn record_chunk(&mut self, chunk: &[u8]) {
        let Some(limit) = self.pending.as_ref().map(|p| p.body_limit) else {
            return;
        };
        self.received += chunk.len() as u64;
        let room = limit.saturating_sub(self.buffer.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);

        if self.expected_len.is_some_and(|len| self.received >= len) {
            self.finish();
        }
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.span
                .record("body_ms", self.start.elapsed().as_millis() as u64);
            let buffer = std::mem::take(&mut self.buffer);
            pending.finish(&buffer, self.truncated, &self.span);
        }
    }
}

impl Stream for CaptureBody {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.record_chunk(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(parent: &self.span, error = %e, "Upstream body failed mid-stream");
                self.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        // Caller disconnected before the end of the body: keep what we have.
        self.finish();
    }
}
