//! Decides which header names are CORS-relevant.

use crate::model::{Exchange, Header};

/// Header names treated as CORS-relevant when none are configured.
pub const DEFAULT_CORS_HEADERS: &[&str] = &[
    "Origin",
    "Access-Control-Request-Method",
    "Access-Control-Request-Headers",
    "Access-Control-Allow-Origin",
    "Access-Control-Allow-Methods",
    "Access-Control-Allow-Headers",
    "Access-Control-Allow-Credentials",
    "Access-Control-Expose-Headers",
    "Access-Control-Max-Age",
];

/// Case-insensitive membership test against the configured name set.
#[derive(Debug, Clone)]
pub struct HeaderClassifier {
    names: Vec<String>,
}

impl HeaderClassifier {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn is_cors_relevant(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// CORS-relevant headers in their original order.
    pub fn relevant<'a>(&'a self, headers: &'a [Header]) -> impl Iterator<Item = &'a Header> + 'a {
        headers.iter().filter(|h| self.is_cors_relevant(&h.key))
    }

    /// Recompute `highlighted` on every header.
    pub fn highlight(&self, headers: &mut [Header]) {
        for header in headers {
            header.highlighted = self.is_cors_relevant(&header.key);
        }
    }

    pub fn highlight_exchange(&self, exchange: &mut Exchange) {
        if let Some(req) = exchange.request.as_mut() {
            self.highlight(&mut req.headers);
        }
        if let Some(resp) = exchange.response.as_mut() {
            self.highlight(&mut resp.headers);
        }
    }
}

impl Default for HeaderClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CORS_HEADERS)
    }
}
