//! Upstream selection.

use axum::http::{header, HeaderMap, Uri};

use crate::config::RouteConfig;

/// Maps an inbound host to the upstream origin it is relayed to.
#[derive(Debug, Clone)]
pub struct UpstreamRouter {
    default_upstream: String,
    routes: Vec<RouteConfig>,
}

impl UpstreamRouter {
    pub fn new(default_upstream: &str, routes: &[RouteConfig]) -> Self {
        Self {
            default_upstream: default_upstream.trim_end_matches('/').to_string(),
            routes: routes
                .iter()
                .map(|r| RouteConfig {
                    host: r.host.trim().to_ascii_lowercase(),
                    upstream: r.upstream.trim_end_matches('/').to_string(),
                })
                .collect(),
        }
    }

    /// Upstream for `host` (already lowercased, port stripped); the default
    /// upstream when no route matches.
    pub fn upstream_for(&self, host: Option<&str>) -> &str {
        host.and_then(|h| self.routes.iter().find(|r| r.host == h))
            .map(|r| r.upstream.as_str())
            .unwrap_or(self.default_upstream.as_str())
    }

    /// Full target URL for an inbound path and query.
    pub fn target_url(&self, host: Option<&str>, path: &str, query: Option<&str>) -> String {
        let upstream = self.upstream_for(host);
        match query {
            Some(q) => format!("{upstream}{path}?{q}"),
            None => format!("{upstream}{path}"),
        }
    }
}

/// Host the client addressed: the authority of an absolute-form URI (as sent
/// to a forward proxy) or else the `Host` header. Lowercased, port removed.
pub fn inbound_host(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let raw = uri.host().map(str::to_string).or_else(|| {
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })?;
    let host = strip_port(raw.trim());
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
