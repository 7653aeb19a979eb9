//! Reachability checks against the upstream.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Result of one reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl Reachability {
    /// Whether the upstream answered.
    pub fn is_reachable(self) -> bool {
        self == Reachability::Reachable
    }
}

impl From<bool> for Reachability {
    fn from(reachable: bool) -> Self {
        if reachable {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        }
    }
}

/// A lightweight reachability check.
///
/// Implementations never fail: network errors and timeouts both resolve to
/// [`Reachability::Unreachable`]. Calls may run concurrently.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Perform one check, giving up after `timeout`.
    async fn check(&self, timeout: Duration) -> Reachability;
}

/// Wraps a probe so that at most one real check runs per cool-down window.
///
/// Callers arriving while a check is in flight wait for it and share its
/// result; callers inside the window after it completes get the cached
/// result without touching the network.
pub struct DebouncedProbe {
    probe: Arc<dyn ConnectivityProbe>,
    timeout: Duration,
    cooldown: Duration,
    last: Mutex<Option<(Instant, Reachability)>>,
}

impl std::fmt::Debug for DebouncedProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedProbe")
            .field("timeout", &self.timeout)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl DebouncedProbe {
    /// Create a debounced wrapper.
    pub fn new(probe: Arc<dyn ConnectivityProbe>, timeout: Duration, cooldown: Duration) -> Self {
        Self {
            probe,
            timeout,
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// Check reachability, reusing a result younger than the cool-down.
    pub async fn check(&self) -> Reachability {
        let mut last = self.last.lock().await;

        if let Some((at, result)) = *last {
            if at.elapsed() < self.cooldown {
                tracing::trace!(?result, "Reusing recent probe result");
                return result;
            }
        }

        // The probe contract says it never hangs; bound it anyway.
        let result = tokio::time::timeout(self.timeout, self.probe.check(self.timeout))
            .await
            .unwrap_or(Reachability::Unreachable);

        tracing::debug!(?result, "Connectivity probe finished");
        *last = Some((Instant::now(), result));
        result
    }

    /// Forget the cached result so the next check hits the network.
    pub async fn invalidate(&self) {
        *self.last.lock().await = None;
    }
}
