//! Mermaid sequence diagrams of captured exchanges.
//!
//! Every exchange renders as an `opt` block with six fixed lines plus one
//! note line per side that carries CORS-relevant headers:
//!
//! ```text
//! opt Exchange 1
//! Browser->>+API: OPTIONS http://api.test/restricted
//! Note over Browser,API: Origin: http://front.test<br />Access-Control-Request-Method: PUT
//! API->>API: Check CORS configuration
//! API-->>-Browser: 204 No Content
//! Note over Browser,API: Access-Control-Allow-Origin: http://front.test
//! Browser->>Browser: Interpret API result
//! end
//! ```

use std::fmt::Write as _;

use crate::classifier::HeaderClassifier;
use crate::model::{Exchange, Header};

/// Mermaid header line for a full document.
pub const PREAMBLE: &str = "sequenceDiagram";

#[derive(Debug, Clone, Default)]
pub struct DiagramRenderer {
    classifier: HeaderClassifier,
}

impl DiagramRenderer {
    pub fn new(classifier: HeaderClassifier) -> Self {
        Self { classifier }
    }

    /// Diagram body (no preamble). Output depends only on the arguments.
    pub fn render(&self, exchanges: &[Exchange], actor_a: &str, actor_b: &str) -> String {
        let mut out = String::new();
        for (index, exchange) in exchanges.iter().enumerate() {
            self.render_exchange(&mut out, index + 1, exchange, actor_a, actor_b);
        }
        out
    }

    /// `render` prefixed with the `sequenceDiagram` preamble.
    pub fn mermaid_document(&self, exchanges: &[Exchange], actor_a: &str, actor_b: &str) -> String {
        format!("{PREAMBLE}\n{}", self.render(exchanges, actor_a, actor_b))
    }

    fn render_exchange(
        &self,
        out: &mut String,
        number: usize,
        exchange: &Exchange,
        a: &str,
        b: &str,
    ) {
        let (method, url, request_headers) = match exchange.request.as_ref() {
            Some(req) => (req.method.as_str(), req.url.as_str(), req.headers.as_slice()),
            None => ("", "", &[][..]),
        };

        let _ = writeln!(out, "opt Exchange {number}");
        let call = format!("{a}->>+{b}: {}", escape(&format!("{method} {url}")));
        let _ = writeln!(out, "{}", call.trim_end());
        self.note(out, request_headers, a, b);
        let _ = writeln!(out, "{b}->>{b}: Check CORS configuration");

        match exchange.response.as_ref() {
            Some(resp) => {
                let status = format!("{} {}", resp.status, resp.status_text());
                let reply = format!("{b}-->>-{a}: {}", escape(&status));
                let _ = writeln!(out, "{}", reply.trim_end());
                self.note(out, &resp.headers, a, b);
            }
            None => {
                // Still deactivate B so the diagram stays balanced.
                let _ = writeln!(out, "{b}-->>-{a}:");
            }
        }

        let _ = writeln!(out, "{a}->>{a}: Interpret API result");
        let _ = writeln!(out, "end");
    }

    fn note(&self, out: &mut String, headers: &[Header], a: &str, b: &str) {
        let parts: Vec<String> = self
            .classifier
            .relevant(headers)
            .map(|h| escape(&format!("{}: {}", h.key, h.value)))
            .collect();
        if !parts.is_empty() {
            let _ = writeln!(out, "Note over {a},{b}: {}", parts.join("<br />"));
        }
    }
}

/// Mermaid treats `;` as a statement separator and newlines end a message.
fn escape(text: &str) -> String {
    text.replace(';', "#59;").replace(['\r', '\n'], " ")
}
