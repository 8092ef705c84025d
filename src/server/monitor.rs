//! Periodic memory usage log while the server is under load

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::registry::SessionRegistry;

/// Observer count above which memory usage is logged
pub const MEMORY_LOG_MIN_OBSERVERS: u64 = 100;

/// Resident memory of this process in MB
pub fn resident_memory_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_kb(&status).map(|kb| kb / 1024)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Extract `VmRSS` (kB) from `/proc/<pid>/status` content
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

/// Spawn the memory logger; returns `None` when disabled
pub fn spawn_memory_monitor(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        debug!("Memory monitor disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let count = registry.count();
            if count <= MEMORY_LOG_MIN_OBSERVERS {
                continue;
            }

            match resident_memory_mb() {
                Some(rss_mb) => info!(observers = count, rss_mb, "Memory usage"),
                None => debug!(observers = count, "Memory usage unavailable on this platform"),
            }
        }
    }))
}
