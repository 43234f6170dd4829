//! Wake notifications between ring peers
//!
//! A wake signal is only a hint that the other side made progress. Consumers
//! always re-read the ring indices after waking and bound every wait with a
//! timeout, so a lost notification costs latency, never a stall.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One-way "data or space may be available" notification
///
/// Across processes this is backed by whatever event primitive the device
/// server hands out; `WakeEvent` covers peers living in the same process.
pub trait WakeSignal: Send + Sync {
    /// Signal the waiting side
    fn notify(&self);

    /// Block until notified or `timeout` elapses
    ///
    /// Returns `true` when a notification was consumed.
    fn wait(&self, timeout: Duration) -> bool;
}

/// Auto-reset event
///
/// A notification posted while nobody waits is remembered until the next
/// `wait`, which consumes it.
#[derive(Debug, Default)]
pub struct WakeEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl WakeEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WakeSignal for WakeEvent {
    fn notify(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self.cond.wait_while_for(&mut signaled, |s| !*s, timeout);
        }
        std::mem::replace(&mut *signaled, false)
    }
}

/// Signal that never wakes anyone, for peers that only poll
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWake;

impl WakeSignal for NoWake {
    fn notify(&self) {}

    fn wait(&self, timeout: Duration) -> bool {
        std::thread::sleep(timeout);
        false
    }
}
