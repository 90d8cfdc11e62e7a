//! Periodic health sweep over a [`CapabilityRegistry`] (§4.7 "Health
//! monitor runs at `heartbeatInterval`").
//!
//! Grounded on the periodic-sweep idiom of
//! `llmspell-agents/src/monitoring/health.rs`, adjusted to spec.md
//! §4.7's two-stage `HEALTHY -> SUSPECT -> removed` timeline rather than
//! the teacher's four-level `HealthStatus` score.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::CapabilityRegistry;

/// Owns the background task that periodically calls
/// [`CapabilityRegistry::sweep`]. Dropping or calling
/// [`HealthMonitor::stop`] cancels the task.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Spawn the sweep loop at `interval`, demoting/removing records
    /// stale past `timeout`/`2*timeout` respectively (§4.7).
    #[must_use]
    pub fn spawn(registry: Arc<CapabilityRegistry>, interval: Duration, timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep(timeout).await;
                        debug!("capability registry health sweep completed");
                    }
                }
            }
        });
        Self { handle, cancel }
    }

    /// Cancel the sweep loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HealthStatus;
    use amcp_broker::Broker;
    use amcp_core::AgentId;
    use std::collections::HashMap;

    #[tokio::test]
    async fn sweep_loop_demotes_stale_record() {
        let broker = Broker::builder().build();
        broker.start();
        let registry = Arc::new(CapabilityRegistry::new(broker));
        let id = AgentId::new("a1", "weather");
        registry
            .register(id.clone(), vec!["forecast".to_string()], "a", HashMap::new())
            .await
            .unwrap();
        registry.age_for_test(&id, chrono::Duration::milliseconds(200));

        let monitor = HealthMonitor::spawn(
            registry.clone(),
            Duration::from_millis(20),
            Duration::from_millis(100),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop().await;

        assert_eq!(registry.lookup(&id).unwrap().status, HealthStatus::Suspect);
    }
}
