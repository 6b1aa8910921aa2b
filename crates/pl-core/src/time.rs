//! Time utilities for peerlink
//!
//! Wall-clock timestamps used for grant bookkeeping. Timeouts and timers use
//! tokio's monotonic clock instead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// # Panics
/// Panics if the system time is before the Unix epoch (1970-01-01),
/// which would indicate a severely misconfigured system.
///
/// # Examples
/// ```
/// use pl_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as u64
}

/// Calculate elapsed time as a Duration since a given millisecond timestamp.
///
/// Returns Duration::ZERO if the given time is in the future.
pub fn elapsed_since(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis_is_positive() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_elapsed_since() {
        let now = current_time_millis();
        std::thread::sleep(Duration::from_millis(10));
        assert!(elapsed_since(now) >= Duration::from_millis(10));
    }

    #[test]
    fn test_elapsed_since_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }
}
