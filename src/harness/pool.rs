//! Pool of simulated observers
//!
//! Grows by a paced ramp, shrinks from the tail, and drives every session's
//! heartbeat from one shared ticker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HarnessSettings;
use crate::error::{Error, Result};

use super::session::{SessionConfig, SessionHandle, SessionState};

/// Ramp progress is logged every this many sessions
const PROGRESS_EVERY: usize = 100;

/// Poll interval while waiting for a ramp to settle
const SETTLE_POLL: Duration = Duration::from_millis(10);

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub session: SessionConfig,

    /// Pause between opening two sessions
    pub ramp_interval: Duration,

    /// Shared heartbeat ticker period
    pub heartbeat_interval: Duration,
}

impl From<&HarnessSettings> for PoolConfig {
    fn from(settings: &HarnessSettings) -> Self {
        Self {
            session: SessionConfig::from(settings),
            ramp_interval: settings.ramp_interval(),
            heartbeat_interval: settings.heartbeat_interval(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────

/// Session counts by state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthReport {
    pub pool_size: usize,
    pub connected: usize,
    pub connecting: usize,
    pub reconnecting: usize,
    pub closed: usize,
    /// Highest count any session last heard from the aggregator
    pub reported_count: Option<u64>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.connected == self.pool_size
    }

    /// Sessions in the pool that are not currently connected
    pub fn unreconciled(&self) -> usize {
        self.pool_size - self.connected
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} connected ({} connecting, {} reconnecting, {} closed)",
            self.connected, self.pool_size, self.connecting, self.reconnecting, self.closed
        )
    }
}

/// Outcome of a ramp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampReport {
    pub target: usize,
    /// Sessions spawned by this ramp
    pub opened: usize,
    /// Spawn attempts that failed outright
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub health: HealthReport,
}

impl RampReport {
    /// Connected sessions relative to the target
    pub fn delta(&self) -> i64 {
        self.health.connected as i64 - self.target as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    Ramped(RampReport),
    Shrunk { removed: usize, pool_size: usize },
    Unchanged { pool_size: usize },
}

// ─────────────────────────────────────────────────────────────────
// Pool Manager
// ─────────────────────────────────────────────────────────────────

struct ActiveRamp {
    id: u64,
    target: usize,
    cancel: CancellationToken,
}

struct PoolInner {
    config: PoolConfig,
    /// Oldest first; shrinking pops from the back
    handles: Mutex<Vec<SessionHandle>>,
    ramp: Mutex<Option<ActiveRamp>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    next_session_id: AtomicU64,
    next_ramp_id: AtomicU64,
}

/// Cheap to clone; clones share one pool
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<PoolInner>,
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                handles: Mutex::new(Vec::new()),
                ramp: Mutex::new(None),
                heartbeat: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                next_ramp_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Target of the running ramp, if any
    pub fn ramp_target(&self) -> Option<usize> {
        self.inner.ramp.lock().as_ref().map(|ramp| ramp.target)
    }

    #[cfg(test)]
    pub fn is_ramping(&self) -> bool {
        self.inner.ramp.lock().is_some()
    }

    /// Grow the pool to `target`, one session per ramp interval
    ///
    /// A target at or below the current size shrinks instead.
    pub async fn ramp_up(&self, target: usize) -> Result<AdjustOutcome> {
        let current = self.size();
        if target <= current {
            info!(current, target, "Already at or above target, reducing");
            return Ok(self.shrink(target));
        }

        let guard = self.begin_ramp(target)?;
        self.ensure_heartbeat();

        let report = self.run_ramp(target, &guard.cancel).await;
        drop(guard);

        info!(
            target = report.target,
            opened = report.opened,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            pool_size = report.health.pool_size,
            connected = report.health.connected,
            delta = report.delta(),
            "Ramp complete"
        );
        Ok(AdjustOutcome::Ramped(report))
    }

    /// Close sessions from the tail until `target` remain
    ///
    /// Cancels a running ramp.
    pub fn shrink(&self, target: usize) -> AdjustOutcome {
        self.cancel_ramp();

        let mut handles = self.inner.handles.lock();
        let pool_size = handles.len();
        if target >= pool_size {
            return AdjustOutcome::Unchanged { pool_size };
        }

        let removed = pool_size - target;
        for handle in handles.drain(target..).rev() {
            trace!(session = handle.id(), "Closing session");
            handle.close();
        }

        info!(removed, pool_size = target, "Pool reduced");
        AdjustOutcome::Shrunk {
            removed,
            pool_size: target,
        }
    }

    /// Move the pool to `target` after dropping sessions that gave up
    ///
    /// A running ramp towards a different target is cancelled first.
    pub async fn adjust(&self, target: usize) -> Result<AdjustOutcome> {
        if self.ramp_target().is_some_and(|running| running != target) {
            self.cancel_ramp();
        }

        let pruned = self.prune_closed();
        if pruned > 0 {
            info!(pruned, "Removed closed sessions before adjusting");
        }

        let current = self.size();
        if target > current {
            self.ramp_up(target).await
        } else if target < current {
            Ok(self.shrink(target))
        } else {
            info!(target, "Pool already at target");
            if current > 0 {
                self.ensure_heartbeat();
            }
            Ok(AdjustOutcome::Unchanged { pool_size: current })
        }
    }

    /// Close everything and stop the ticker; idempotent
    pub fn disconnect_all(&self) -> usize {
        self.cancel_ramp();
        if let Some(ticker) = self.inner.heartbeat.lock().take() {
            ticker.abort();
        }

        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles.iter().rev() {
            handle.close();
        }

        if !handles.is_empty() {
            info!(closed = handles.len(), "Disconnected all sessions");
        }
        handles.len()
    }

    /// Count sessions by state
    pub fn health_check(&self) -> HealthReport {
        let handles = self.inner.handles.lock();
        let mut report = HealthReport {
            pool_size: handles.len(),
            ..Default::default()
        };

        for handle in handles.iter() {
            let status = handle.status();
            report.reported_count = report.reported_count.max(status.last_count);
            match status.state {
                SessionState::Connected => report.connected += 1,
                SessionState::Connecting => report.connecting += 1,
                SessionState::Disconnected | SessionState::Reconnecting { .. } => {
                    report.reconnecting += 1
                }
                SessionState::Closed(_) => report.closed += 1,
            }
        }

        report
    }

    // ─────────────────────────────────────────────────────────────
    // Ramp Internals
    // ─────────────────────────────────────────────────────────────

    fn begin_ramp(&self, target: usize) -> Result<RampGuard> {
        let mut slot = self.inner.ramp.lock();
        if let Some(ref active) = *slot {
            debug!(running = active.target, rejected = target, "Ramp already in progress");
            return Err(Error::RampInProgress { target });
        }

        let id = self.inner.next_ramp_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRamp {
            id,
            target,
            cancel: cancel.clone(),
        });

        Ok(RampGuard {
            pool: Arc::downgrade(&self.inner),
            id,
            cancel,
        })
    }

    fn cancel_ramp(&self) {
        if let Some(ramp) = self.inner.ramp.lock().take() {
            info!(target = ramp.target, "Cancelling ramp");
            ramp.cancel.cancel();
        }
    }

    async fn run_ramp(&self, target: usize, cancel: &CancellationToken) -> RampReport {
        let start = Instant::now();
        let to_add = target.saturating_sub(self.size());
        let interval = self.inner.config.ramp_interval;
        info!(
            to_add,
            target,
            interval_ms = interval.as_millis() as u64,
            "Ramping up"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut opened = 0;
        let mut failed = 0;
        let mut cancelled = false;

        for _ in 0..to_add {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }

            match self.open_session(target, cancel) {
                Ok(true) => {
                    opened += 1;
                    if opened % PROGRESS_EVERY == 0 {
                        info!(opened, to_add, "Ramp progress");
                    }
                }
                Ok(false) => {
                    cancelled = cancel.is_cancelled();
                    break;
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Failed to open session");
                }
            }
        }

        if !cancelled {
            cancelled = !self.settle(cancel).await;
        }

        RampReport {
            target,
            opened,
            failed,
            cancelled,
            elapsed: start.elapsed(),
            health: self.health_check(),
        }
    }

    /// Spawn one session unless the ramp was cancelled or the pool is full
    fn open_session(&self, target: usize, cancel: &CancellationToken) -> Result<bool> {
        let mut handles = self.inner.handles.lock();
        // Checked under the pool lock so a concurrent shrink cannot be undone
        if cancel.is_cancelled() || handles.len() >= target {
            return Ok(false);
        }

        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle::spawn(id, self.inner.config.session.clone())?;
        trace!(session = id, pool_size = handles.len() + 1, "Session opened");
        handles.push(handle);
        Ok(true)
    }

    /// Wait for pending first connections; false if cancelled meanwhile
    async fn settle(&self, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + self.inner.config.session.connect_timeout;

        loop {
            if self.health_check().connecting == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                debug!("Ramp settle deadline reached");
                return true;
            }

            tokio::select! {
                _ = tokio::time::sleep(SETTLE_POLL) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    fn prune_closed(&self) -> usize {
        let mut handles = self.inner.handles.lock();
        let before = handles.len();
        handles.retain(|handle| !handle.state().is_closed());
        before - handles.len()
    }

    // ─────────────────────────────────────────────────────────────
    // Heartbeat
    // ─────────────────────────────────────────────────────────────

    /// Start the shared heartbeat ticker unless it is already running
    fn ensure_heartbeat(&self) {
        let mut slot = self.inner.heartbeat.lock();
        if slot.as_ref().map_or(false, |ticker| !ticker.is_finished()) {
            return;
        }

        let pool = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval;
        *slot = Some(tokio::spawn(heartbeat_loop(pool, period)));
        debug!(interval_ms = period.as_millis() as u64, "Heartbeat ticker started");
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("size", &self.size())
            .field("ramp_target", &self.ramp_target())
            .finish()
    }
}

/// Clears the ramp slot when the ramp ends, even if its future is dropped
struct RampGuard {
    pool: Weak<PoolInner>,
    id: u64,
    cancel: CancellationToken,
}

impl Drop for RampGuard {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut slot = pool.ramp.lock();
        // A newer ramp may own the slot after a cancel
        if slot.as_ref().map_or(false, |ramp| ramp.id == self.id) {
            *slot = None;
        }
    }
}

async fn heartbeat_loop(pool: Weak<PoolInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(pool) = pool.upgrade() else {
            break;
        };
        let sent = pool
            .handles
            .lock()
            .iter()
            .filter(|handle| handle.heartbeat())
            .count();
        if sent > 0 && sent % 100 == 0 {
            info!(sent, "Heartbeats sent");
        } else {
            trace!(sent, "Heartbeats queued");
        }
    }
}
