//! Background sync worker.
//!
//! Requests arrive on a channel with room for one pending request, so any
//! number of triggers that land while a request is already queued collapse
//! into a single run.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::sync::{SyncOrchestrator, SyncOutcome};

/// Result of asking for a resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    Queued,
    /// A request was already pending; this one was merged into it.
    Coalesced,
}

/// Anything that can be asked to schedule a sync run.
pub trait ResyncTrigger: Send + Sync {
    fn request(&self) -> Result<TriggerStatus, SyncError>;
}

/// Cheap, cloneable handle used to request runs from a [`SyncWorker`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<()>,
}

impl ResyncTrigger for SyncHandle {
    fn request(&self) -> Result<TriggerStatus, SyncError> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(TriggerStatus::Queued),
            Err(mpsc::error::TrySendError::Full(())) => Ok(TriggerStatus::Coalesced),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::WorkerStopped),
        }
    }
}

pub struct SyncWorker {
    orchestrator: Arc<SyncOrchestrator>,
    rx: mpsc::Receiver<()>,
    debounce: Duration,
}

impl SyncWorker {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, debounce: Duration) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                orchestrator,
                rx,
                debounce,
            },
            SyncHandle { tx },
        )
    }

    /// Spawn the worker loop. It ends once every [`SyncHandle`] is dropped and
    /// the pending request, if any, has been served.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            if !self.debounce.is_zero() {
                tokio::time::sleep(self.debounce).await;
            }
            // Requests that arrived during the debounce window are served by this run.
            while self.rx.try_recv().is_ok() {}

            match self.orchestrator.run_sync().await {
                Ok(SyncOutcome::Imported { run_id, rows, .. }) => {
                    info!(%run_id, rows, "queued sync imported catalog");
                }
                Ok(SyncOutcome::NoOp { run_id, .. }) => {
                    info!(%run_id, "queued sync found nothing to import");
                }
                Err(SyncError::AlreadyRunning) => {
                    warn!("sync already running; dropping queued request");
                }
                Err(err) => {
                    error!(?err, "queued sync failed");
                }
            }
        }
        info!("sync worker stopped");
    }
}
