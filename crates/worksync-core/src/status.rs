use crate::sync::SyncReport;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Notifications fanned out to anyone holding a subscription: connectivity
/// flips, queue growth, drain results and peer-link changes. Enough for a
/// consumer to derive the three user-visible states (saved locally, synced,
/// sync error pending retry) from these plus `pending_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Online,
    Offline,
    /// A mutation was enqueued instead of applied immediately.
    OperationQueued { pending: usize },
    /// A drain pass finished, possibly with zero work.
    SyncCompleted(SyncReport),
    PeerConnected { peer_name: String },
    PeerDisconnected,
    PeerSnapshotSent { count: usize },
    PeerSnapshotReceived { accepted: usize, duplicates: usize },
    /// Periodic check found queued work while no peer link is up.
    NearbyDataPending { pending: usize },
}

/// Fan-out bus for [`StatusEvent`]s.
///
/// Subscribers each get their own unbounded channel; a dropped subscription
/// is reaped on the next publish, so abandoning one is always safe.
#[derive(Default)]
pub struct StatusBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StatusEvent>>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        StatusSubscription { rx }
    }

    pub fn publish(&self, event: StatusEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<StatusEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One subscriber's end of the bus. Dropping it unsubscribes; [`unsubscribe`]
/// exists for call sites that want to say so explicitly.
///
/// [`unsubscribe`]: StatusSubscription::unsubscribe
pub struct StatusSubscription {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusSubscription {
    /// Wait for the next event; `None` once the bus itself is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Non-blocking read of the next buffered event.
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}
