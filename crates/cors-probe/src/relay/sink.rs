//! Ordered hand-off of finished captures to the exchange store.
//!
//! Captures are finalized inside response bodies, possibly on different
//! tasks. Funnelling them through one channel and one writer task keeps the
//! store's per-run order equal to the order captures were finalized in,
//! without making the response wait on the write.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::model::Exchange;
use crate::store::{append_blocking, SharedStore};

/// One exchange waiting to be persisted.
#[derive(Debug)]
pub struct CaptureRecord {
    pub correlation_id: String,
    pub exchange: Exchange,
}

enum WriterMessage {
    Capture(CaptureRecord),
    /// Acknowledged once everything queued ahead of it is persisted.
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable handle for submitting captures.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: mpsc::Sender<WriterMessage>,
}

impl CaptureSink {
    /// Spawn the writer task. It exits once every sink clone is dropped and
    /// the queue is drained.
    pub fn start(store: SharedStore, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<WriterMessage>(capacity.max(1));
        let handle = tokio::spawn(run_writer_loop(store, rx));
        (Self { tx }, handle)
    }

    /// Queue a capture without waiting. A full queue or a stopped writer
    /// drops the capture.
    pub fn submit(&self, record: CaptureRecord) {
        match self.tx.try_send(WriterMessage::Capture(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(WriterMessage::Capture(record))) => {
                tracing::error!(
                    correlation_id = %record.correlation_id,
                    "Capture queue full, exchange dropped"
                );
            }
            Err(TrySendError::Closed(WriterMessage::Capture(record))) => {
                tracing::warn!(
                    correlation_id = %record.correlation_id,
                    "Capture writer stopped, exchange dropped"
                );
            }
            Err(_) => {}
        }
    }

    /// Wait until every capture submitted before this call has been written
    /// (or dropped after a failed write). Returns at once if the writer is
    /// gone.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run_writer_loop(store: SharedStore, mut rx: mpsc::Receiver<WriterMessage>) {
    while let Some(message) = rx.recv().await {
        let record = match message {
            WriterMessage::Capture(record) => record,
            WriterMessage::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };
        let correlation_id = record.correlation_id.clone();
        match append_blocking(store.clone(), record.correlation_id, record.exchange).await {
            Ok(()) => tracing::debug!(correlation_id = %correlation_id, "Exchange persisted"),
            Err(e) => tracing::error!(
                error = %e,
                correlation_id = %correlation_id,
                "Failed to persist exchange, dropping it"
            ),
        }
    }
    tracing::debug!("Capture writer shutting down");
}
