use crate::status::{StatusBus, StatusEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Best-known reachability of the remote store.
///
/// Whatever probe the host wires in calls `set_online`; there is no ambient
/// platform state here. Every reported transition is forwarded through the
/// status bus as-is, without debouncing or coalescing.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    bus: Arc<StatusBus>,
}

impl ConnectivityMonitor {
    pub fn new(bus: Arc<StatusBus>, initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            bus,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a reachability report and publish it to subscribers.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            debug!(online, "connectivity changed");
        }
        self.bus.publish(if online {
            StatusEvent::Online
        } else {
            StatusEvent::Offline
        });
    }
}
