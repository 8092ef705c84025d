//! Load harness
//!
//! Opens and maintains a configurable number of concurrent observer sessions
//! against an aggregator.

mod control;
mod pool;
mod session;

pub use control::run;

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    /// Poll `condition` until it holds or `within` elapses
    pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }
}
