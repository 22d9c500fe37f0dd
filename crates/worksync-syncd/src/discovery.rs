use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use worksync_core::{OfflineService, StatusBus, StatusEvent};

use crate::peer::{PeerLinkState, PeerTransport};

/// Periodic reminder that queued work could be handed to a nearby peer.
///
/// This never opens connections on its own. It only surfaces a
/// [`StatusEvent::NearbyDataPending`] so a frontend can prompt the user,
/// and stays quiet while a link is already up.
pub struct DiscoveryController {
    service: Arc<OfflineService>,
    transport: Arc<PeerTransport>,
    bus: Arc<StatusBus>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryController {
    pub fn new(
        service: Arc<OfflineService>,
        transport: Arc<PeerTransport>,
        bus: Arc<StatusBus>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            transport,
            bus,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Begin the periodic check. The first pass runs right away. Calling
    /// this while already running is a no-op.
    pub fn start(&self) {
        let mut task = self.lock_task();
        if task.is_some() {
            debug!("discovery already running");
            return;
        }
        let service = self.service.clone();
        let transport = self.transport.clone();
        let bus = self.bus.clone();
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                check_pass(&service, &transport, &bus);
            }
        }));
        debug!(interval_secs = self.interval.as_secs(), "discovery started");
    }

    /// Stop the periodic check. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            debug!("discovery stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn check_pass(service: &OfflineService, transport: &PeerTransport, bus: &StatusBus) {
    if !matches!(transport.state(), PeerLinkState::Disconnected) {
        debug!("skipping discovery pass, peer link active");
        return;
    }
    match service.pending_count() {
        Ok(0) => {}
        Ok(pending) => {
            debug!(pending, "pending operations could be shared with a peer");
            bus.publish(StatusEvent::NearbyDataPending { pending });
        }
        Err(err) => warn!(error = %err, "discovery queue check failed"),
    }
}

impl Drop for DiscoveryController {
    fn drop(&mut self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }
}
