//! Authoritative observer count
//!
//! Every connect/disconnect/force mutation goes through [`SessionRegistry`],
//! which serializes it on one lock and then asks the coalescer for a
//! broadcast. The count itself lives in [`ObserverCount`] so the coalescer
//! can read snapshots without being able to write them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, trace};

use crate::config::ServerSettings;
use crate::error::{Error, Result};

use super::coalescer::BroadcastCoalescer;

/// Ascending breakpoints for the threshold level
pub const OBSERVER_THRESHOLDS: [u64; 11] = [1, 3, 5, 10, 20, 50, 100, 200, 500, 1000, 5000];

/// Greatest breakpoint not exceeding `count`, or 0 below the first one
pub fn threshold_for(count: u64) -> u64 {
    OBSERVER_THRESHOLDS
        .iter()
        .rev()
        .find(|&&breakpoint| count >= breakpoint)
        .copied()
        .unwrap_or(0)
}

/// Count and derived threshold at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceSnapshot {
    pub count: u64,
    pub threshold: u64,
}

impl PresenceSnapshot {
    pub fn of(count: u64) -> Self {
        Self {
            count,
            threshold: threshold_for(count),
        }
    }
}

/// Result of admitting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Position of the session at connect time
    pub ordinal: u64,
    pub count: u64,
}

// ─────────────────────────────────────────────────────────────────
// Observer Count
// ─────────────────────────────────────────────────────────────────

/// Live observer count; writable only inside the server module
#[derive(Debug, Default)]
pub struct ObserverCount {
    value: Mutex<u64>,
}

impl ObserverCount {
    pub fn get(&self) -> u64 {
        *self.value.lock()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::of(self.get())
    }

    pub(super) fn increment(&self) -> u64 {
        let mut value = self.value.lock();
        *value += 1;
        *value
    }

    pub(super) fn decrement(&self) -> u64 {
        let mut value = self.value.lock();
        *value = value.saturating_sub(1);
        *value
    }

    pub(super) fn set(&self, count: u64) {
        *self.value.lock() = count;
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Registry
// ─────────────────────────────────────────────────────────────────

pub struct SessionRegistry {
    count: Arc<ObserverCount>,
    coalescer: Arc<BroadcastCoalescer>,
    testing_mode: bool,
    debug_mode: bool,
}

impl SessionRegistry {
    pub fn new(settings: &ServerSettings) -> Self {
        let count = Arc::new(ObserverCount::default());
        let coalescer = Arc::new(BroadcastCoalescer::new(
            Arc::clone(&count),
            settings.broadcast_throttle(),
            settings.high_load_threshold,
            settings.update_channel_capacity,
        ));

        Self {
            count,
            coalescer,
            testing_mode: settings.testing_mode,
            debug_mode: settings.debug_mode,
        }
    }

    /// Count a new session and return its ordinal
    pub fn connect(&self) -> Admission {
        let count = self.count.increment();
        if self.debug_mode || count % 100 == 0 {
            info!(total = count, "Observer connected");
        } else {
            trace!(total = count, "Observer connected");
        }

        self.coalescer.request_broadcast();
        Admission {
            ordinal: count,
            count,
        }
    }

    /// Remove a session; the count never drops below zero
    pub fn disconnect(&self) -> u64 {
        let count = self.count.decrement();
        if self.debug_mode || count % 100 == 0 {
            info!(total = count, "Observer disconnected");
        } else {
            trace!(total = count, "Observer disconnected");
        }

        self.coalescer.request_broadcast();
        count
    }

    /// Overwrite the count; only available in testing mode
    pub fn force_set(&self, count: u64) -> Result<PresenceSnapshot> {
        if !self.testing_mode {
            return Err(Error::permission_denied("force-count"));
        }

        self.count.set(count);
        info!(count, "Forced observer count");
        self.coalescer.request_broadcast();
        Ok(PresenceSnapshot::of(count))
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.count.snapshot()
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }

    pub fn testing_mode(&self) -> bool {
        self.testing_mode
    }

    /// Receive coalesced updates
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.coalescer.subscribe()
    }

    pub fn coalescer(&self) -> &Arc<BroadcastCoalescer> {
        &self.coalescer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(testing_mode: bool) -> SessionRegistry {
        SessionRegistry::new(&ServerSettings {
            testing_mode,
            ..Default::default()
        })
    }

    #[test]
    fn test_threshold_breakpoints() {
        assert_eq!(threshold_for(0), 0);
        assert_eq!(threshold_for(1), 1);
        assert_eq!(threshold_for(2), 1);
        assert_eq!(threshold_for(4), 3);
        assert_eq!(threshold_for(49), 20);
        assert_eq!(threshold_for(1000), 1000);
        assert_eq!(threshold_for(4999), 1000);
        assert_eq!(threshold_for(u64::MAX), 5000);
    }

    #[test]
    fn test_threshold_is_monotonic() {
        let mut previous = 0;
        for count in 0..6000 {
            let threshold = threshold_for(count);
            assert!(threshold >= previous, "threshold dropped at {}", count);
            assert!(threshold <= count);
            previous = threshold;
        }
    }

    #[tokio::test]
    async fn test_connect_assigns_ordinals() {
        let registry = registry(false);
        assert_eq!(registry.connect(), Admission { ordinal: 1, count: 1 });
        assert_eq!(registry.connect(), Admission { ordinal: 2, count: 2 });
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn test_connect_disconnect_sequence() {
        let registry = registry(true);

        for _ in 0..5 {
            registry.connect();
        }
        assert_eq!(registry.snapshot(), PresenceSnapshot { count: 5, threshold: 5 });

        registry.disconnect();
        registry.disconnect();
        assert_eq!(registry.snapshot(), PresenceSnapshot { count: 3, threshold: 3 });

        let forced = registry.force_set(1000).unwrap();
        assert_eq!(forced, PresenceSnapshot { count: 1000, threshold: 1000 });
        assert_eq!(registry.snapshot(), forced);
    }

    #[tokio::test]
    async fn test_disconnect_floors_at_zero() {
        let registry = registry(false);
        registry.connect();
        assert_eq!(registry.disconnect(), 0);
        assert_eq!(registry.disconnect(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_count_matches_clamped_event_sequence() {
        let registry = registry(false);
        // true = connect, false = disconnect
        let events = [true, false, false, true, true, true, false, true, false, false, false, true];
        let mut expected: u64 = 0;
        for connect in events {
            if connect {
                registry.connect();
                expected += 1;
            } else {
                registry.disconnect();
                expected = expected.saturating_sub(1);
            }
            assert_eq!(registry.count(), expected);
        }
    }

    #[tokio::test]
    async fn test_force_set_requires_testing_mode() {
        let registry = registry(false);
        registry.connect();

        let err = registry.force_set(500).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_mutations_are_not_lost() {
        let registry = Arc::new(registry(false));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    registry.connect();
                }
                for _ in 0..100 {
                    registry.disconnect();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.count(), 8 * 150);
    }

    #[tokio::test]
    async fn test_mutation_broadcasts_snapshot() {
        let registry = registry(false);
        let mut updates = registry.subscribe();

        registry.connect();
        let update = updates.recv().await.unwrap();
        assert_eq!(update, PresenceSnapshot { count: 1, threshold: 1 });
    }
}
