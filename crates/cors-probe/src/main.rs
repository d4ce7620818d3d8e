//! cors-probe binary: relay and control API listeners.

use std::sync::Arc;
use std::time::Duration;

use cors_probe::classifier::HeaderClassifier;
use cors_probe::config::{ProbeConfig, StoreKind};
use cors_probe::evaluator::Evaluator;
use cors_probe::relay::routing::UpstreamRouter;
use cors_probe::relay::sink::CaptureSink;
use cors_probe::relay::RelayState;
use cors_probe::runs::RunRegistry;
use cors_probe::server::{self, ControlState};
use cors_probe::settle::Settler;
use cors_probe::store;

/// How long shutdown waits for queued captures to reach the store.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("CORS_PROBE_CONFIG").ok())
        .unwrap_or_else(|| "cors-probe.toml".to_string());

    let upstream_override = args
        .iter()
        .position(|a| a == "--upstream")
        .and_then(|i| args.get(i + 1).cloned());

    let store_override = args
        .iter()
        .position(|a| a == "--store")
        .and_then(|i| args.get(i + 1).cloned());

    // Load configuration
    let mut config = ProbeConfig::load(&config_path)?;

    // Apply CLI overrides (take precedence over TOML and env vars)
    if let Some(url) = upstream_override {
        config.relay.upstream_url = url;
    }
    if let Some(kind) = store_override {
        config.store.kind = match kind.as_str() {
            "memory" => StoreKind::Memory,
            "sqlite" => StoreKind::Sqlite,
            other => anyhow::bail!("unknown store kind '{other}', expected memory or sqlite"),
        };
    }

    // Build the tokio runtime first; the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // Initialize tracing (OTLP export is optional, falls back to fmt-only)
        let tracing_guard = probe_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            relay_address = %config.server.relay_address,
            control_address = %config.server.control_address,
            upstream_url = %config.relay.upstream_url,
            routes = config.relay.routes.len(),
            store = ?config.store.kind,
            settle = ?config.settle.mode,
            otlp_export = tracing_guard.exporting(),
            "Starting cors-probe"
        );

        let result = run(config).await;
        drop(tracing_guard);
        result
    })
}

async fn run(config: ProbeConfig) -> anyhow::Result<()> {
    // The relay must see upstream responses as sent: no redirects followed,
    // no system proxy in between.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.relay.timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()?;

    let store = store::open(&config.store)?;
    let (sink, writer) = CaptureSink::start(store.clone(), config.relay.capture_queue);

    let classifier = HeaderClassifier::new(&config.cors.headers);
    let evaluator = Arc::new(Evaluator::new(
        classifier,
        &config.evaluator.actor_a,
        &config.evaluator.actor_b,
    ));

    let relay_state = RelayState {
        client,
        sink: sink.clone(),
        router: UpstreamRouter::new(&config.relay.upstream_url, &config.relay.routes),
        max_body_bytes: config.relay.max_body_bytes,
    };

    let control_state = ControlState {
        store,
        runs: RunRegistry::new(),
        evaluator,
        settler: Settler::new(config.settle.clone()).with_capture_sink(sink),
        driver_origin_url: config.evaluator.driver_origin_url.clone(),
        presets_api_url: config.presets.api_url.clone(),
    };

    let result = server::run(&config.server, relay_state, control_state).await;

    // Listeners are gone and with them every sink handle; let the writer
    // finish what is queued.
    match tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => tracing::debug!("Capture writer drained"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Capture writer task failed"),
        Err(_) => tracing::warn!("Timed out draining capture writer"),
    }

    result
}
