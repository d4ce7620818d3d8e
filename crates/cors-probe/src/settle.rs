//! Deciding when a run's traffic has finished arriving.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{SettleConfig, SettleMode};
use crate::relay::sink::CaptureSink;
use crate::store::{count_blocking, SharedStore};

/// Why waiting stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The driver raised the completion signal.
    Completed,
    /// Captured exchange count stopped changing.
    Idle,
    /// `max_wait_ms` elapsed first.
    TimedOut,
    /// Fixed delay elapsed.
    Fixed,
}

impl SettleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SettleOutcome::Completed => "completed",
            SettleOutcome::Idle => "idle",
            SettleOutcome::TimedOut => "timed_out",
            SettleOutcome::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settler {
    config: SettleConfig,
    sink: Option<CaptureSink>,
}

impl Settler {
    pub fn new(config: SettleConfig) -> Self {
        Self { config, sink: None }
    }

    /// Flush `sink` before reporting a run as settled, so captures still
    /// queued for the writer are in the store when evaluation reads it.
    pub fn with_capture_sink(mut self, sink: CaptureSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Wait for run `correlation_id` to settle under the configured policy.
    /// `completion` resolves when the driver signals the run is done; it is
    /// ignored in fixed mode.
    pub async fn settle(
        &self,
        store: SharedStore,
        correlation_id: &str,
        completion: impl Future<Output = ()>,
    ) -> SettleOutcome {
        let span = probe_tracing::settle_span!(correlation_id, self.config.mode);
        let start = Instant::now();

        async {
            let outcome = match self.config.mode {
                SettleMode::Fixed => {
                    tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
                    SettleOutcome::Fixed
                }
                SettleMode::Idle => self.wait_idle(store, correlation_id, completion).await,
            };
            if let Some(sink) = &self.sink {
                sink.flush().await;
            }

            let waited = start.elapsed().as_millis() as u64;
            let span = tracing::Span::current();
            span.record("outcome", outcome.as_str());
            span.record("waited_ms", waited);
            tracing::info!(outcome = outcome.as_str(), waited_ms = waited, "Run settled");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn wait_idle(
        &self,
        store: SharedStore,
        correlation_id: &str,
        completion: impl Future<Output = ()>,
    ) -> SettleOutcome {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let idle = Duration::from_millis(self.config.idle_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.max_wait_ms);

        tokio::pin!(completion);

        let mut last_count: Option<usize> = None;
        let mut unchanged_since = Instant::now();

        loop {
            tokio::select! {
                _ = &mut completion => return SettleOutcome::Completed,
                _ = tokio::time::sleep_until(deadline) => return SettleOutcome::TimedOut,
                _ = tokio::time::sleep(poll) => {}
            }

            let count = match count_blocking(store.clone(), correlation_id.to_string()).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll capture count");
                    continue;
                }
            };

            let now = Instant::now();
            if last_count != Some(count) {
                tracing::debug!(count, "Capture count changed");
                last_count = Some(count);
                unchanged_since = now;
            } else if count > 0 && now.duration_since(unchanged_since) >= idle {
                return SettleOutcome::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::relay::sink::CaptureRecord;
    use crate::store::testing::exchange;
    use crate::store::MemoryStore;

    fn config(mode: SettleMode) -> SettleConfig {
        SettleConfig {
            mode,
            delay_ms: 30,
            idle_ms: 40,
            poll_interval_ms: 10,
            max_wait_ms: 300,
        }
    }

    #[tokio::test]
    async fn test_completion_signal_wins() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let settler = Settler::new(config(SettleMode::Idle));
        let start = std::time::Instant::now();

        let outcome = settler
            .settle(store, "run", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
            .await;

        assert_eq!(outcome, SettleOutcome::Completed);
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_idle_once_count_stabilizes() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        store
            .append("run", &exchange("GET", "http://api.test/", Some(200)))
            .unwrap();
        let settler = Settler::new(config(SettleMode::Idle));

        let outcome = settler
            .settle(store, "run", std::future::pending::<()>())
            .await;
        assert_eq!(outcome, SettleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_times_out_without_traffic() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let settler = Settler::new(config(SettleMode::Idle));

        let outcome = settler
            .settle(store, "run", std::future::pending::<()>())
            .await;
        assert_eq!(outcome, SettleOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_completion_flushes_queued_captures() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (sink, _writer) = CaptureSink::start(store.clone(), 64);
        let settler = Settler::new(config(SettleMode::Idle)).with_capture_sink(sink.clone());

        let outcome = settler
            .settle(store.clone(), "run", async {
                for path in ["/preflight", "/actual"] {
                    sink.submit(CaptureRecord {
                        correlation_id: "run".into(),
                        exchange: exchange("GET", &format!("http://api.test{path}"), Some(200)),
                    });
                }
            })
            .await;

        assert_eq!(outcome, SettleOutcome::Completed);
        assert_eq!(store.count("run").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fixed_mode_ignores_completion() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let settler = Settler::new(config(SettleMode::Fixed));
        let start = std::time::Instant::now();

        let outcome = settler.settle(store, "run", async {}).await;
        assert_eq!(outcome, SettleOutcome::Fixed);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
