use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where the network status comes from. The host owns the real listener.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Events that make the repository retry a full reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    ConnectivityLost,
    /// App came back to the foreground.
    Foreground,
}

/// Shared online/offline flag flipped by the host's network listener.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Record a status change and return the matching trigger, or `None`
    /// when the status did not actually change.
    pub fn set(&self, online: bool) -> Option<SyncTrigger> {
        let was = self.online.swap(online, Ordering::SeqCst);
        match (was, online) {
            (false, true) => Some(SyncTrigger::ConnectivityRestored),
            (true, false) => Some(SyncTrigger::ConnectivityLost),
            _ => None,
        }
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
