//! Captured HTTP messages and evaluation results.
//!
//! These are the shapes persisted by the exchange store and returned to
//! callers of the control API (JSON, camelCase).

use serde::{Deserialize, Serialize};

/// One captured header.
///
/// `highlighted` is a read-time projection computed by the
/// [`HeaderClassifier`](crate::classifier::HeaderClassifier); it is written
/// out for callers but never read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub key: String,
    pub value: String,
    #[serde(default, skip_deserializing)]
    pub highlighted: bool,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            highlighted: false,
        }
    }
}

/// Value of the first header named `name` (ASCII case-insensitive).
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.key.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<String>,
    /// The upstream body exceeded the capture limit; `body` holds a prefix.
    #[serde(default)]
    pub body_truncated: bool,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// 4xx and 5xx responses.
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.status)
    }

    /// Canonical reason phrase, empty for unregistered codes.
    pub fn status_text(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }
}

/// A captured request/response pair. Either side may be missing when the
/// capture was partial (e.g. the upstream never answered).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    #[serde(default)]
    pub request: Option<Request>,
    #[serde(default)]
    pub response: Option<Response>,
}

/// Exchanges of one run in arrival order.
pub type ExchangeSequence = Vec<Exchange>;

/// Verdict for one negotiated aspect (origin, method or headers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceItem {
    pub name: String,
    pub requested: Option<String>,
    pub received: Option<String>,
    pub is_valid: bool,
}

impl ComplianceItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requested: None,
            received: None,
            is_valid: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSummary {
    pub is_preflight: bool,
    pub origin: ComplianceItem,
    pub method: ComplianceItem,
    pub headers: ComplianceItem,
}

impl Default for ComplianceSummary {
    fn default() -> Self {
        Self {
            is_preflight: false,
            origin: ComplianceItem::new("Origin"),
            method: ComplianceItem::new("Method"),
            headers: ComplianceItem::new("Headers"),
        }
    }
}

/// A console message emitted by the driven page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub text: String,
    pub kind: String,
}

/// Everything a caller gets back for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub exchanges: ExchangeSequence,
    pub summary: Option<ComplianceSummary>,
    pub diagram: Option<String>,
    pub console_log: Vec<ConsoleMessage>,
    pub failed: bool,
    pub error: Option<String>,
}

impl RunResult {
    /// A failed run carrying only the error text.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            failed: true,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn with_console(mut self, console_log: Vec<ConsoleMessage>) -> Self {
        self.console_log = console_log;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_error_range() {
        let mut resp = Response {
            status: 200,
            headers: vec![],
            body: None,
            body_truncated: false,
        };
        assert!(!resp.is_error());
        resp.status = 400;
        assert!(resp.is_error());
        resp.status = 599;
        assert!(resp.is_error());
        resp.status = 600;
        assert!(!resp.is_error());
    }

    #[test]
    fn test_status_text() {
        let resp = Response {
            status: 204,
            headers: vec![],
            body: None,
            body_truncated: false,
        };
        assert_eq!(resp.status_text(), "No Content");

        let unknown = Response {
            status: 599,
            headers: vec![],
            body: None,
            body_truncated: false,
        };
        assert_eq!(unknown.status_text(), "");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive_first_wins() {
        let headers = vec![
            Header::new("Origin", "http://a.test"),
            Header::new("origin", "http://b.test"),
        ];
        assert_eq!(find_header(&headers, "ORIGIN"), Some("http://a.test"));
        assert_eq!(find_header(&headers, "Referer"), None);
    }

    #[test]
    fn test_highlighted_is_not_read_back() {
        let json = r#"{"key":"Origin","value":"http://a.test","highlighted":true}"#;
        let header: Header = serde_json::from_str(json).unwrap();
        assert!(!header.highlighted);

        let mut header = header;
        header.highlighted = true;
        let out = serde_json::to_value(&header).unwrap();
        assert_eq!(out["highlighted"], true);
    }

    #[test]
    fn test_failure_result_shape() {
        let result = RunResult::failure("no exchanges captured");
        assert!(result.failed);
        assert_eq!(result.error.as_deref(), Some("no exchanges captured"));
        assert!(result.summary.is_none());
        assert!(result.diagram.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["consoleLog"], serde_json::json!([]));
    }
}
