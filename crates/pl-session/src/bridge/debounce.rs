//! Trailing-edge debounce for resize events

use std::time::Duration;

use tokio::time::Instant;

use pl_core::SurfaceSize;

/// Coalesces bursts of resizes into the last one.
///
/// Each [`push`](Self::push) restarts the quiet window; once it elapses
/// with no further push, [`take`](Self::take) yields the final size.
#[derive(Debug)]
pub struct ResizeDebouncer {
    window: Duration,
    pending: Option<SurfaceSize>,
    deadline: Option<Instant>,
}

impl ResizeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    /// Record a resize. Returns true if it starts a new burst.
    pub fn push(&mut self, size: SurfaceSize) -> bool {
        let started = self.pending.is_none();
        self.pending = Some(size);
        self.deadline = Some(Instant::now() + self.window);
        started
    }

    /// When the pending resize becomes due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending size if its quiet window has elapsed
    pub fn take(&mut self) -> Option<SurfaceSize> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_final_size() {
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(150));

        assert!(debouncer.push(SurfaceSize::new(100, 30)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!debouncer.push(SurfaceSize::new(110, 32)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!debouncer.push(SurfaceSize::new(120, 40)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(debouncer.take(), None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(debouncer.take(), Some(SurfaceSize::new(120, 40)));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.take(), None);
    }
}
