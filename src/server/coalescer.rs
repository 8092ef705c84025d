//! Rate-limited presence broadcasts
//!
//! Mutations request a broadcast; the coalescer sends at most one update per
//! throttle window and always follows a burst with a trailing update that
//! carries the count as it is when the deferred send fires.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::registry::{ObserverCount, PresenceSnapshot, OBSERVER_THRESHOLDS};

/// Counters exposed for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoalescerStats {
    pub requests: u64,
    pub broadcasts: u64,
    pub pending: bool,
}

struct PendingBroadcast {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct CoalescerState {
    last_broadcast: Option<Instant>,
    pending: Option<PendingBroadcast>,
    generation: u64,
    requests: u64,
    broadcasts: u64,
}

pub struct BroadcastCoalescer {
    count: Arc<ObserverCount>,
    throttle: Duration,
    high_load_threshold: u64,
    updates: broadcast::Sender<PresenceSnapshot>,
    state: Mutex<CoalescerState>,
}

impl BroadcastCoalescer {
    pub fn new(
        count: Arc<ObserverCount>,
        throttle: Duration,
        high_load_threshold: u64,
        capacity: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            count,
            throttle,
            high_load_threshold,
            updates,
            state: Mutex::new(CoalescerState::default()),
        }
    }

    /// Current throttle window; doubles under high load
    pub fn window(&self) -> Duration {
        if self.count.get() > self.high_load_threshold {
            self.throttle * 2
        } else {
            self.throttle
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.updates.subscribe()
    }

    pub fn stats(&self) -> CoalescerStats {
        let state = self.state.lock();
        CoalescerStats {
            requests: state.requests,
            broadcasts: state.broadcasts,
            pending: state.pending.is_some(),
        }
    }

    /// Broadcast now if the window has elapsed, otherwise (re)schedule a
    /// deferred broadcast for the end of the window
    pub fn request_broadcast(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.requests += 1;

        match Self::remaining(&state, self.window()) {
            Some(delay) => self.schedule(&mut state, delay),
            None => self.fire(&mut state),
        }
    }

    /// Time left in the current window, `None` once it has elapsed
    fn remaining(state: &CoalescerState, window: Duration) -> Option<Duration> {
        let last = state.last_broadcast?;
        let elapsed = Instant::now().saturating_duration_since(last);
        if elapsed >= window {
            None
        } else {
            Some(window - elapsed)
        }
    }

    fn schedule(self: &Arc<Self>, state: &mut CoalescerState, delay: Duration) {
        if let Some(previous) = state.pending.take() {
            previous.task.abort();
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                // Shutting down outside the runtime; nobody is left to defer for
                debug!("No runtime for deferred broadcast, sending immediately");
                self.fire(state);
                return;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let coalescer = Arc::clone(self);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            coalescer.on_deadline(generation);
        });

        trace!(delay_ms = delay.as_millis() as u64, generation, "Deferred broadcast scheduled");
        state.pending = Some(PendingBroadcast { generation, task });
    }

    fn on_deadline(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        match state.pending {
            Some(ref pending) if pending.generation == generation => {}
            // Replaced or already flushed
            _ => return,
        }
        state.pending = None;

        // The window may have grown since scheduling
        match Self::remaining(&state, self.window()) {
            Some(delay) => self.schedule(&mut state, delay),
            None => self.fire(&mut state),
        }
    }

    fn fire(&self, state: &mut CoalescerState) {
        if let Some(pending) = state.pending.take() {
            pending.task.abort();
        }

        let snapshot = self.count.snapshot();
        if OBSERVER_THRESHOLDS.contains(&snapshot.count) {
            info!(threshold = snapshot.count, "Threshold reached");
        }

        // No subscribers is not an error
        let receivers = self.updates.send(snapshot).unwrap_or(0);
        state.last_broadcast = Some(Instant::now());
        state.broadcasts += 1;

        trace!(
            count = snapshot.count,
            threshold = snapshot.threshold,
            receivers,
            "Broadcast sent"
        );
    }
}
