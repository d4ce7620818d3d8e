//! Axum HTTP servers: relay and control API listeners, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::evaluator::Evaluator;
use crate::model::ConsoleMessage;
use crate::presets;
use crate::relay::{self, correlation, RelayState};
use crate::runs::RunRegistry;
use crate::settle::Settler;
use crate::store::SharedStore;

/// Shared state of the control API.
#[derive(Clone)]
pub struct ControlState {
    pub store: SharedStore,
    pub runs: RunRegistry,
    pub evaluator: Arc<Evaluator>,
    pub settler: Settler,
    pub driver_origin_url: String,
    pub presets_api_url: String,
}

/// Bind both listeners and serve until Ctrl+C.
pub async fn run(
    config: &ServerConfig,
    relay_state: RelayState,
    control_state: ControlState,
) -> anyhow::Result<()> {
    let relay_app = relay::router(relay_state);
    let control_app = control_router(control_state, &config.control_allowed_origins);

    let relay_listener = tokio::net::TcpListener::bind(&config.relay_address).await?;
    tracing::info!(address = %config.relay_address, "Relay listening");
    let control_listener = tokio::net::TcpListener::bind(&config.control_address).await?;
    tracing::info!(address = %config.control_address, "Control API listening");

    let relay_server = async {
        axum::serve(relay_listener, relay_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };
    let control_server = async {
        axum::serve(control_listener, control_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };
    tokio::try_join!(relay_server, control_server)?;

    tracing::info!("cors-probe shut down gracefully");
    Ok(())
}

/// Control API routes.
pub fn control_router(state: ControlState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/runs", post(handle_create_run))
        .route("/api/runs/{id}/console", post(handle_push_console))
        .route("/api/runs/{id}/complete", post(handle_complete_run))
        .route("/api/runs/{id}/evaluate", post(handle_evaluate_run))
        .route("/api/presets", get(handle_list_presets))
        .route("/api/presets/{key}", get(handle_get_preset))
        .route("/api/endpoints", get(handle_list_endpoints))
        .layer(control_cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Browser UIs on `allowed_origins` may call the control API; `"*"` allows
/// any origin.
fn control_cors(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// How a driver should tag the traffic of a newly opened run.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTicket {
    pub correlation_id: String,
    pub header: String,
    pub query_param: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    #[serde(default)]
    driver_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresetQuery {
    endpoint: Option<String>,
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// POST /api/runs: open a run and hand out its correlation id.
async fn handle_create_run(State(state): State<Arc<ControlState>>) -> Response {
    let correlation_id = correlation::generate_id();
    state.runs.open(&correlation_id);
    tracing::info!(correlation_id = %correlation_id, "Run opened");

    (
        StatusCode::CREATED,
        Json(RunTicket {
            correlation_id,
            header: correlation::CORRELATION_HEADER.to_string(),
            query_param: correlation::CORRELATION_QUERY_PARAM.to_string(),
        }),
    )
        .into_response()
}

/// POST /api/runs/{id}/console: append console messages from the page.
async fn handle_push_console(
    State(state): State<Arc<ControlState>>,
    Path(id): Path<String>,
    Json(messages): Json<Vec<ConsoleMessage>>,
) -> Response {
    if state.runs.push_console(&id, messages) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_json(StatusCode::NOT_FOUND, "unknown run")
    }
}

/// POST /api/runs/{id}/complete: raise the run's completion signal.
async fn handle_complete_run(
    State(state): State<Arc<ControlState>>,
    Path(id): Path<String>,
) -> Response {
    if state.runs.complete(&id) {
        tracing::debug!(correlation_id = %id, "Run completion signalled");
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_json(StatusCode::NOT_FOUND, "unknown run")
    }
}

/// POST /api/runs/{id}/evaluate: settle, evaluate and close the run.
///
/// The body is optional; `driverOrigin` overrides the configured driver
/// origin for navigation filtering.
async fn handle_evaluate_run(
    State(state): State<Arc<ControlState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request: EvaluateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        EvaluateRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Invalid evaluate request body");
                return error_json(StatusCode::BAD_REQUEST, "invalid request body");
            }
        }
    };
    let driver_origin = request
        .driver_origin
        .unwrap_or_else(|| state.driver_origin_url.clone());

    state
        .settler
        .settle(state.store.clone(), &id, state.runs.completion(&id))
        .await;

    let result = state
        .evaluator
        .evaluate_run(state.store.clone(), &id, &driver_origin)
        .await
        .with_console(state.runs.close(&id));

    Json(result).into_response()
}

/// GET /api/presets: `[{key, name}]`.
async fn handle_list_presets() -> Response {
    Json(presets::PRESETS).into_response()
}

/// GET /api/endpoints: `[{path}]`.
async fn handle_list_endpoints() -> Response {
    Json(presets::ENDPOINTS).into_response()
}

/// GET /api/presets/{key}?endpoint=/path: script text aimed at the API.
async fn handle_get_preset(
    State(state): State<Arc<ControlState>>,
    Path(key): Path<String>,
    Query(query): Query<PresetQuery>,
) -> Response {
    let Some(endpoint) = query.endpoint else {
        return error_json(StatusCode::BAD_REQUEST, "missing 'endpoint' query parameter");
    };
    match presets::render(&key, &state.presets_api_url, &endpoint) {
        Some(script) => script.into_response(),
        None => error_json(StatusCode::NOT_FOUND, "unknown preset"),
    }
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
