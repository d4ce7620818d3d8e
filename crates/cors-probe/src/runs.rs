//! Open runs: completion signal and console log per correlation id.
//!
//! A run is opened before the driver starts sending traffic. The driver (or a
//! UI relaying for it) pushes console messages and finally raises the
//! completion signal; evaluation waits on that signal through the settle
//! policy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::model::ConsoleMessage;

struct RunEntry {
    done: watch::Sender<bool>,
    console: Vec<ConsoleMessage>,
}

impl RunEntry {
    fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            done,
            console: Vec::new(),
        }
    }
}

/// Registry of open runs. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<HashMap<String, RunEntry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        // Entries stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `correlation_id`. Re-opening an existing run keeps it.
    pub fn open(&self, correlation_id: &str) {
        self.lock()
            .entry(correlation_id.to_string())
            .or_insert_with(RunEntry::new);
    }

    /// Raise the completion signal. Returns `false` for unknown runs.
    pub fn complete(&self, correlation_id: &str) -> bool {
        match self.lock().get(correlation_id) {
            Some(entry) => {
                entry.done.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Append console messages. Returns `false` for unknown runs.
    pub fn push_console(&self, correlation_id: &str, messages: Vec<ConsoleMessage>) -> bool {
        match self.lock().get_mut(correlation_id) {
            Some(entry) => {
                entry.console.extend(messages);
                true
            }
            None => false,
        }
    }

    /// Future resolving when the run's completion signal is raised. Unknown
    /// runs (and runs closed while waiting) never resolve; the settle
    /// deadline bounds the wait.
    pub fn completion(&self, correlation_id: &str) -> impl Future<Output = ()> + Send + 'static {
        let rx = self.lock().get(correlation_id).map(|e| e.done.subscribe());
        async move {
            if let Some(mut rx) = rx {
                if rx.wait_for(|done| *done).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        }
    }

    /// Forget the run, returning its console log.
    pub fn close(&self, correlation_id: &str) -> Vec<ConsoleMessage> {
        self.lock()
            .remove(correlation_id)
            .map(|e| e.console)
            .unwrap_or_default()
    }
}
