//! Social broadcast of narrative events.
//!
//! Commits never wait on the social service. Events are handed to a
//! [`BroadcastHandle`], which `try_send`s them into a bounded channel; a
//! single pump task drains the channel and publishes through a
//! [`Broadcaster`]. When the channel is full the event is dropped and
//! counted. A publish failure triggers one reconnect attempt and the pump
//! moves on to the next event.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warband_types::NarrativeEvent;

use crate::shutdown::ShutdownSignal;

/// Errors raised by a broadcaster.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The transport failed before the service answered.
    #[error("broadcast transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The service answered with an error status.
    #[error("broadcast rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },
}

/// Something that can publish narrative events.
pub trait Broadcaster: Send + Sync + 'static {
    /// Publish one event.
    fn publish(
        &self,
        event: &NarrativeEvent,
    ) -> impl Future<Output = Result<(), BroadcastError>> + Send;

    /// Re-establish the connection after a failure.
    fn reconnect(&self) -> impl Future<Output = Result<(), BroadcastError>> + Send;
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    async fn publish(&self, event: &NarrativeEvent) -> Result<(), BroadcastError> {
        tracing::info!(event_id = %event.id.into_inner(), summary = %event.summary(), "Narrative event");
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    async fn publish(&self, _event: &NarrativeEvent) -> Result<(), BroadcastError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// Non-blocking sender side of the broadcast pump.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    tx: mpsc::Sender<NarrativeEvent>,
    dropped: Arc<AtomicU64>,
}

impl BroadcastHandle {
    /// Queue events without waiting. Events that do not fit are dropped.
    pub fn emit(&self, events: &[NarrativeEvent]) {
        for event in events {
            if let Err(e) = self.tx.try_send(event.clone()) {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                tracing::warn!(error = %e, dropped_total = total, "Broadcast queue full; event dropped");
            }
        }
    }

    /// Events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Start the pump task.
///
/// The pump stops when every handle is dropped, or when `shutdown` fires,
/// after publishing whatever is already queued.
pub fn spawn_pump<B: Broadcaster>(
    broadcaster: Arc<B>,
    capacity: usize,
    shutdown: Arc<ShutdownSignal>,
) -> (BroadcastHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let handle = BroadcastHandle {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(event) => publish(&*broadcaster, &event).await,
                    None => break,
                },
                () = shutdown.wait() => {
                    while let Ok(event) = rx.try_recv() {
                        publish(&*broadcaster, &event).await;
                    }
                    break;
                }
            }
        }
        tracing::info!("Broadcast pump stopped");
    });
    (handle, task)
}

async fn publish<B: Broadcaster>(broadcaster: &B, event: &NarrativeEvent) {
    let Err(e) = broadcaster.publish(event).await else {
        return;
    };
    tracing::warn!(error = %e, "Broadcast failed; reconnecting");
    if let Err(e) = broadcaster.reconnect().await {
        tracing::error!(error = %e, "Social reconnect failed");
    }
}
