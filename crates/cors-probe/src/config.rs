//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use probe_tracing::TracingConfig;
use serde::Deserialize;

use crate::classifier::DEFAULT_CORS_HEADERS;

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub settle: SettleConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Listen addresses for the two HTTP surfaces.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Where drivers send the traffic to be relayed and captured.
    #[serde(default = "default_relay_address")]
    pub relay_address: String,

    /// Where drivers and UIs open runs and fetch results.
    #[serde(default = "default_control_address")]
    pub control_address: String,

    /// Origins allowed to call the control API from a browser.
    #[serde(default)]
    pub control_allowed_origins: Vec<String>,
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Origin every inbound request is relayed to unless a route matches.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Largest inbound request body accepted for forwarding, and the most
    /// response body bytes kept in a capture.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Per-host upstream overrides, matched against the inbound host.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Capture submissions buffered before new ones are dropped.
    #[serde(default = "default_capture_queue")]
    pub capture_queue: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    pub host: String,
    pub upstream: String,
}

/// Header names treated as CORS-relevant (case-insensitive).
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_headers")]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Database file, used when `kind = "sqlite"`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorConfig {
    /// Requests whose URL starts with this prefix load the driving page
    /// itself and are dropped before evaluation.
    #[serde(default)]
    pub driver_origin_url: String,

    #[serde(default = "default_actor_a")]
    pub actor_a: String,

    #[serde(default = "default_actor_b")]
    pub actor_b: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettleMode {
    /// Sleep `delay_ms`, then evaluate whatever has arrived.
    Fixed,
    /// Wait for the completion signal or for capture to go idle.
    #[default]
    Idle,
}

/// How long to wait for a run's traffic before evaluating it.
#[derive(Debug, Clone, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub mode: SettleMode,

    #[serde(default = "default_settle_delay")]
    pub delay_ms: u64,

    #[serde(default = "default_settle_idle")]
    pub idle_ms: u64,

    #[serde(default = "default_settle_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_settle_max_wait")]
    pub max_wait_ms: u64,
}

/// Request script catalogue served by the control API.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetsConfig {
    /// Base URL substituted for `<APIURL>` in preset scripts.
    #[serde(default = "default_presets_api_url")]
    pub api_url: String,
}

fn default_relay_address() -> String {
    "0.0.0.0:5080".to_string()
}

fn default_control_address() -> String {
    "0.0.0.0:5081".to_string()
}

fn default_upstream_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_capture_queue() -> usize {
    1024
}

fn default_cors_headers() -> Vec<String> {
    DEFAULT_CORS_HEADERS.iter().map(|h| h.to_string()).collect()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("cors-probe.db")
}

fn default_actor_a() -> String {
    "Browser".to_string()
}

fn default_actor_b() -> String {
    "API".to_string()
}

fn default_settle_delay() -> u64 {
    3000
}

fn default_settle_idle() -> u64 {
    500
}

fn default_settle_poll() -> u64 {
    100
}

fn default_settle_max_wait() -> u64 {
    10_000
}

fn default_presets_api_url() -> String {
    "http://localhost:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            relay_address: default_relay_address(),
            control_address: default_control_address(),
            control_allowed_origins: Vec::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            timeout_secs: default_timeout(),
            max_body_bytes: default_max_body_bytes(),
            routes: Vec::new(),
            capture_queue: default_capture_queue(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            headers: default_cors_headers(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            driver_origin_url: String::new(),
            actor_a: default_actor_a(),
            actor_b: default_actor_b(),
        }
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            mode: SettleMode::default(),
            delay_ms: default_settle_delay(),
            idle_ms: default_settle_idle(),
            poll_interval_ms: default_settle_poll(),
            max_wait_ms: default_settle_max_wait(),
        }
    }
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            api_url: default_presets_api_url(),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (PROBE_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(config_path))
                .merge(Env::prefixed("PROBE_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: ProbeConfig = figment.extract()?;
        Ok(config)
    }
}
