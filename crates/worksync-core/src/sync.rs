use crate::connectivity::ConnectivityMonitor;
use crate::error::StorageError;
use crate::executor::OperationExecutor;
use crate::queue::QueueStore;
use crate::remote::RemoteStore;
use crate::status::{StatusBus, StatusEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for one finished drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub synced: usize,
    pub errors: usize,
}

/// What happened to a drain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A full pass ran; the report may be all zeroes for an empty queue.
    Completed(SyncReport),
    /// Another pass was mid-flight; nothing ran.
    AlreadyRunning,
    /// The device is offline; nothing ran.
    Offline,
}

/// Drains the pending queue against the remote store, one record at a time.
///
/// Exactly one pass runs at a time. Each pass snapshots `list_pending` once,
/// walks it in enqueue order, marks successes and counts failures without
/// stopping. Failed records stay queued for the next trigger.
pub struct SyncOrchestrator {
    store: Arc<QueueStore>,
    executor: OperationExecutor,
    monitor: Arc<ConnectivityMonitor>,
    bus: Arc<StatusBus>,
    draining: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<QueueStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: Arc<ConnectivityMonitor>,
        bus: Arc<StatusBus>,
    ) -> Self {
        Self {
            store,
            executor: OperationExecutor::new(remote),
            monitor,
            bus,
            draining: AtomicBool::new(false),
        }
    }

    /// Run one drain pass if the device is online and none is in flight.
    pub async fn drain(&self) -> Result<DrainOutcome, StorageError> {
        if !self.monitor.is_online() {
            debug!("drain requested while offline, skipping");
            return Ok(DrainOutcome::Offline);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in flight, skipping");
            return Ok(DrainOutcome::AlreadyRunning);
        }

        let result = self.run_pass().await;
        self.draining.store(false, Ordering::SeqCst);

        let report = result?;
        self.bus.publish(StatusEvent::SyncCompleted(report));
        Ok(DrainOutcome::Completed(report))
    }

    async fn run_pass(&self) -> Result<SyncReport, StorageError> {
        let pending = self.store.list_pending()?;
        if pending.is_empty() {
            debug!("nothing to sync");
            return Ok(SyncReport::default());
        }

        info!(count = pending.len(), "draining pending operations");
        let mut report = SyncReport::default();
        for op in &pending {
            match self.executor.execute(&op.draft()).await {
                Ok(()) => {
                    self.store.mark_synced(op.id)?;
                    report.synced += 1;
                }
                Err(err) => {
                    warn!(
                        id = op.id,
                        collection = %op.collection,
                        record = %op.record_id,
                        error = %err,
                        "remote write failed, record stays queued"
                    );
                    report.errors += 1;
                }
            }
        }
        info!(synced = report.synced, errors = report.errors, "drain finished");
        Ok(report)
    }
}
