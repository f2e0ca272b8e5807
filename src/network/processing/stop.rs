use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal for a running queue.
///
/// Clones share one flag and can be moved to other threads, e.g. into a
/// Ctrl-C handler. The receive loop checks the flag after every datagram and
/// after every read timeout, so set a poll interval on the queue if it must
/// stop while no traffic arrives.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the receive loop to return after the current datagram.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
