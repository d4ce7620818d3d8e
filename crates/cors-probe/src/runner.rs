//! Driving a full run: tag, navigate, execute the script, settle, evaluate.
//!
//! The page driver (a headless browser in practice) is abstracted behind
//! [`Driver`]. It must tag every request of the run with the correlation id
//! it receives in `initialize_run`, typically by sending traffic through the
//! relay with the `x-cors-probe-run` header.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DriverError, RunFailure};
use crate::evaluator::Evaluator;
use crate::model::{ConsoleMessage, RunResult};
use crate::relay::correlation;
use crate::settle::Settler;
use crate::store::SharedStore;

/// Something that can load a page and run a script in it.
pub trait Driver: Send + Sync {
    /// Prepare a fresh page whose traffic carries `correlation_id`.
    fn initialize_run(
        &self,
        correlation_id: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Run `script` in the page. Script errors surface as
    /// [`DriverError::Script`].
    fn evaluate(&self, script: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Resolve `true` once the page reports its network activity is done,
    /// `false` if it cannot tell within `timeout`.
    fn wait_settled(&self, timeout: Duration) -> impl Future<Output = bool> + Send;

    /// Console messages emitted since `initialize_run`.
    fn console_messages(&self) -> Vec<ConsoleMessage>;
}

/// Runs scripts through a driver and evaluates the captured traffic.
pub struct ProbeRunner<D> {
    driver: D,
    store: SharedStore,
    evaluator: Arc<Evaluator>,
    settler: Settler,
    driver_origin_url: String,
    max_wait: Duration,
}

impl<D: Driver> ProbeRunner<D> {
    pub fn new(
        driver: D,
        store: SharedStore,
        evaluator: Arc<Evaluator>,
        settler: Settler,
        driver_origin_url: &str,
        max_wait: Duration,
    ) -> Self {
        Self {
            driver,
            store,
            evaluator,
            settler,
            driver_origin_url: driver_origin_url.to_string(),
            max_wait,
        }
    }

    /// Execute `script` under a new correlation id and return the verdict.
    pub async fn run(&self, script: &str) -> RunResult {
        let correlation_id = correlation::generate_id();
        tracing::info!(correlation_id = %correlation_id, "Starting run");

        if let Err(e) = self.drive(&correlation_id, script).await {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "Run aborted");
            return RunResult::failure(RunFailure::from(e))
                .with_console(self.driver.console_messages());
        }

        let completion = async {
            if !self.driver.wait_settled(self.max_wait).await {
                // No signal: leave it to idle polling and the deadline.
                std::future::pending::<()>().await;
            }
        };
        self.settler
            .settle(self.store.clone(), &correlation_id, completion)
            .await;

        self.evaluator
            .evaluate_run(self.store.clone(), &correlation_id, &self.driver_origin_url)
            .await
            .with_console(self.driver.console_messages())
    }

    async fn drive(&self, correlation_id: &str, script: &str) -> Result<(), DriverError> {
        self.driver.initialize_run(correlation_id).await?;
        if !self.driver_origin_url.is_empty() {
            self.driver.navigate(&self.driver_origin_url).await?;
        }
        self.driver.evaluate(script).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{SettleConfig, SettleMode};
    use crate::model::{Exchange, Header, Request, Response};
    use crate::store::MemoryStore;

    /// Driver that "performs" a preflighted request by writing captures
    /// straight into the store.
    struct FakeDriver {
        store: SharedStore,
        run: Mutex<Option<String>>,
        console: Mutex<Vec<ConsoleMessage>>,
        script_error: Option<String>,
    }

    impl FakeDriver {
        fn new(store: SharedStore) -> Self {
            Self {
                store,
                run: Mutex::new(None),
                console: Mutex::new(Vec::new()),
                script_error: None,
            }
        }

        fn capture(&self, exchange: Exchange) {
            let run = self.run.lock().unwrap().clone().unwrap();
            self.store.append(&run, &exchange).unwrap();
        }
    }

    impl Driver for FakeDriver {
        async fn initialize_run(&self, correlation_id: &str) -> Result<(), DriverError> {
            *self.run.lock().unwrap() = Some(correlation_id.to_string());
            Ok(())
        }

        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.capture(Exchange {
                request: Some(Request {
                    method: "GET".into(),
                    url: format!("{url}/"),
                    headers: vec![],
                    body: None,
                }),
                response: Some(Response {
                    status: 200,
                    headers: vec![],
                    body: Some("<html></html>".into()),
                    body_truncated: false,
                }),
            });
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<(), DriverError> {
            if let Some(message) = &self.script_error {
                return Err(DriverError::Script(message.clone()));
            }
            self.capture(Exchange {
                request: Some(Request {
                    method: "OPTIONS".into(),
                    url: "http://api.test/restricted".into(),
                    headers: vec![
                        Header::new("Origin", "http://front.test"),
                        Header::new("Access-Control-Request-Method", "PUT"),
                    ],
                    body: None,
                }),
                response: Some(Response {
                    status: 204,
                    headers: vec![
                        Header::new("Access-Control-Allow-Origin", "http://front.test"),
                        Header::new("Access-Control-Allow-Methods", "GET,PUT"),
                    ],
                    body: None,
                    body_truncated: false,
                }),
            });
            self.console.lock().unwrap().push(ConsoleMessage {
                text: "OK".into(),
                kind: "log".into(),
            });
            Ok(())
        }

        async fn wait_settled(&self, _timeout: Duration) -> bool {
            true
        }

        fn console_messages(&self) -> Vec<ConsoleMessage> {
            self.console.lock().unwrap().clone()
        }
    }

    fn runner(driver: FakeDriver, store: SharedStore) -> ProbeRunner<FakeDriver> {
        ProbeRunner::new(
            driver,
            store,
            Arc::new(Evaluator::default()),
            Settler::new(SettleConfig {
                mode: SettleMode::Idle,
                delay_ms: 0,
                idle_ms: 50,
                poll_interval_ms: 10,
                max_wait_ms: 1000,
            }),
            "http://front.test",
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_run_evaluates_preflight() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let result = runner(FakeDriver::new(store.clone()), store).run("fetch()").await;

        assert!(!result.failed, "{:?}", result.error);
        // Navigation to the driving page is filtered out.
        assert_eq!(result.exchanges.len(), 1);
        let summary = result.summary.unwrap();
        assert!(summary.is_preflight);
        assert!(summary.origin.is_valid);
        assert!(summary.method.is_valid);
        assert!(summary.headers.is_valid);
        assert_eq!(result.console_log.len(), 1);
    }

    #[tokio::test]
    async fn test_script_error_fails_run() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut driver = FakeDriver::new(store.clone());
        driver.script_error = Some("SyntaxError: Unexpected token".into());

        let result = runner(driver, store).run("fetch(").await;
        assert!(result.failed);
        assert_eq!(result.error.as_deref(), Some("SyntaxError: Unexpected token"));
        assert!(result.summary.is_none());
    }
}
