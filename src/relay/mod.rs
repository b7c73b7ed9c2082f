//! Relay Module
//!
//! Listener and session management for the local SOCKS5 endpoint plus the
//! encrypted TCP and UDP relays behind it.

pub mod manager;
pub mod tcp;
pub mod udp;

pub use manager::RelayManager;
pub use tcp::TcpRelaySession;
pub use udp::UdpRelayMapper;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last-activity clock shared between a session task and the sweeper.
///
/// Stores milliseconds since its own creation instant so the hot path is a
/// single relaxed atomic store.
#[derive(Debug)]
pub struct ActivityTracker {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_tracker_touch_resets_idle() {
        let tracker = ActivityTracker::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(tracker.idle_for() >= Duration::from_millis(15));

        tracker.touch();
        assert!(tracker.idle_for() < Duration::from_millis(15));
    }
}
