//! Background tasks: reconnect supervision and the periodic refresh.
//!
//! Both tasks hold only a weak reference to the engine. Dropping the last
//! [`SyncEngine`] handle ends them; [`SyncEngine::shutdown`] ends them at once.

use crate::cache::ConnectivityState;
use crate::config::BackoffPolicy;
use crate::engine::{EngineInner, SyncEngine};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handles to an engine's background tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(engine: &SyncEngine) -> Self {
        let config = engine.config();
        let supervisor = tokio::spawn(supervise(
            engine.downgrade(),
            engine.inner.state.subscribe(),
            Arc::clone(&engine.inner.retry),
            config.backoff,
        ));
        let refresher = tokio::spawn(refresh_periodically(
            engine.downgrade(),
            config.refresh_interval,
        ));

        tracing::info!(
            refresh_interval_ms = config.refresh_interval.as_millis() as u64,
            "Background sync tasks started"
        );
        Self {
            handles: vec![supervisor, refresher],
        }
    }

    /// Whether any task is still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }

    /// Abort every task and wait for it to finish.
    pub(crate) async fn stop(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            // Cancellation is the expected outcome
            let _ = handle.await;
        }
    }
}

fn upgrade(engine: &Weak<EngineInner>) -> Option<SyncEngine> {
    engine.upgrade().map(|inner| SyncEngine { inner })
}

/// Settled connectivity, or `None` once the engine is gone.
fn settled_state(engine: &Weak<EngineInner>) -> Option<ConnectivityState> {
    upgrade(engine).map(|e| e.cache().connectivity)
}

/// Reconnect loop.
///
/// Sleeps until the engine goes offline, then probes with exponential
/// backoff. On reconnect it runs a full refresh (which replays the offline
/// queue before fetching) and goes back to sleep. Once the attempts are used
/// up it waits for a manual retry or for another probe to report a change.
async fn supervise(
    engine: Weak<EngineInner>,
    mut state: watch::Receiver<ConnectivityState>,
    retry: Arc<Notify>,
    backoff: BackoffPolicy,
) {
    loop {
        loop {
            match settled_state(&engine) {
                None => return,
                Some(ConnectivityState::Offline) => break,
                Some(_) => {}
            }
            if state.changed().await.is_err() {
                return;
            }
        }

        tracing::info!("Upstream unreachable; starting reconnect attempts");
        let mut attempt = 0u32;

        loop {
            match backoff.delay_for(attempt) {
                Some(delay) => {
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect attempt"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = retry.notified() => attempt = 0,
                    }
                }
                None => {
                    tracing::warn!(attempts = attempt, "Reconnect attempts exhausted; waiting for a retry");
                    // Ignore the changes our own probes produced.
                    state.borrow_and_update();
                    tokio::select! {
                        _ = retry.notified() => attempt = 0,
                        changed = state.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            let Some(handle) = upgrade(&engine) else {
                return;
            };

            // Someone else may have reconnected while we slept.
            if handle.cache().connectivity == ConnectivityState::Online {
                tracing::debug!("Already back online");
                break;
            }

            // A running refresh probes on its own; reuse its verdict.
            if handle.is_refreshing() {
                if handle.sync_all().await.reachability.is_reachable() {
                    break;
                }
            } else if handle.probe_now(None).await.is_reachable() {
                tracing::info!(attempt, "Reconnected to upstream");
                handle.sync_all().await;
                break;
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Run a full refresh every `interval`, starting immediately.
async fn refresh_periodically(engine: Weak<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(handle) = upgrade(&engine) else {
            return;
        };
        if handle.is_refreshing() {
            tracing::debug!("Refresh already running; skipping tick");
            continue;
        }
        let report = handle.sync_all().await;
        tracing::debug!(
            cycle = report.cycle,
            reachable = report.reachability.is_reachable(),
            "Periodic refresh finished"
        );
    }
}
