//! Capturing relay: forwards every inbound request to its upstream and
//! records tagged exchanges.

pub mod capture;
pub mod correlation;
pub mod forward;
pub mod routing;
pub mod sink;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::Instrument;

use crate::error::RelayError;
use routing::UpstreamRouter;
use sink::CaptureSink;

/// State shared by relay handlers. `max_body_bytes` bounds inbound bodies
/// and the captured copy of upstream bodies.
#[derive(Clone)]
pub struct RelayState {
    pub client: reqwest::Client,
    pub sink: CaptureSink,
    pub router: UpstreamRouter,
    pub max_body_bytes: usize,
}

/// Relay surface: every method and path is forwarded.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .fallback(handle_relay)
        .with_state(Arc::new(state))
}

async fn handle_relay(State(state): State<Arc<RelayState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let tagged = correlation::extract(request.headers(), request.uri().query());
    let span = probe_tracing::relay_request_span!(
        tagged.correlation_id.as_deref().unwrap_or("-"),
        &method,
        &path
    );

    async {
        if method == Method::CONNECT {
            tracing::debug!("CONNECT tunnelling is not supported");
            return (StatusCode::NOT_IMPLEMENTED, "CONNECT not supported").into_response();
        }

        let host = routing::inbound_host(request.uri(), request.headers());
        let url = state
            .router
            .target_url(host.as_deref(), &path, tagged.query.as_deref());
        tracing::Span::current().record("upstream", state.router.upstream_for(host.as_deref()));

        let headers = request.headers().clone();
        let body = match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
            Ok(b) => b,
            Err(e) => {
                let e = RelayError::BodyRead(e.to_string());
                tracing::error!(error = %e, "Failed to read request body");
                return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
            }
        };

        let response = forward::forward(
            &state.client,
            &state.sink,
            method,
            &url,
            &headers,
            body,
            tagged.correlation_id.as_deref(),
            state.max_body_bytes,
        )
        .await;
        tracing::Span::current().record("status", response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
