use std::collections::HashMap;
use std::sync::Mutex;

use super::ExchangeStore;
use crate::error::StoreError;
use crate::model::Exchange;

/// Process-local store. Rows live until the process exits.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, Vec<Exchange>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExchangeStore for MemoryStore {
    fn append(&self, correlation_id: &str, exchange: &Exchange) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().map_err(|_| StoreError::Poisoned)?;
        runs.entry(correlation_id.to_string())
            .or_default()
            .push(exchange.clone());
        Ok(())
    }

    fn read_all(&self, correlation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        let runs = self.runs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(runs.get(correlation_id).cloned().unwrap_or_default())
    }

    fn count(&self, correlation_id: &str) -> Result<usize, StoreError> {
        let runs = self.runs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(runs.get(correlation_id).map_or(0, Vec::len))
    }
}
