//! Best-effort revocation of access grants

use std::sync::Arc;
use std::time::Duration;

use pl_core::config::BackoffConfig;
use pl_core::traits::AccessControl;
use pl_core::{PeerId, TunnelError};

/// Exponential backoff with jitter between revoke attempts
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }
}

/// Revoke the temporary access for `peer_id`, retrying with backoff.
///
/// Failures are logged and returned; callers running this in the
/// background only log them.
pub(crate) async fn revoke_grant(
    access: Arc<dyn AccessControl>,
    peer_id: PeerId,
    backoff: &BackoffConfig,
    max_attempts: u32,
) -> Result<(), TunnelError> {
    let mut delays = ExponentialBackoff::from_config(backoff);
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match access.disconnect(&peer_id).await {
            Ok(()) => {
                tracing::info!("Revoked temporary access to peer {}", peer_id);
                return Ok(());
            }
            Err(e) if attempt < max_attempts => {
                let delay = delays.next_delay();
                tracing::warn!(
                    "Revoke attempt {}/{} for peer {} failed: {}, retrying in {:?}",
                    attempt,
                    max_attempts,
                    peer_id,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    "Giving up revoking access to peer {} after {} attempts: {}",
                    peer_id,
                    attempt,
                    e
                );
                return Err(TunnelError::RevokeFailed(e.to_string()));
            }
        }
    }
}
