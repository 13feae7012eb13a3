//! Timer-driven queue draining and retention sweeps.

use crate::bus::CommunicationBus;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

impl CommunicationBus {
    /// Spawn the bus pump: priority drains, normal drains and retention
    /// sweeps on their configured intervals. No-op if already running.
    ///
    /// When several ticks are due at once the priority queue is always
    /// drained first.
    pub fn start(self: &Arc<Self>) {
        let mut pump = self.pump.lock();
        if pump.is_some() || self.shutdown.is_triggered() {
            return;
        }

        let bus = Arc::clone(self);
        let mut listener = self.shutdown.listener();
        let handle = tokio::spawn(async move {
            let config = bus.config().clone();
            let mut priority = interval(config.priority_tick());
            let mut normal = interval(config.normal_tick());
            let cleanup_every = config.cleanup_interval();
            let mut cleanup = interval_at(Instant::now() + cleanup_every, cleanup_every);
            priority.set_missed_tick_behavior(MissedTickBehavior::Delay);
            normal.set_missed_tick_behavior(MissedTickBehavior::Delay);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                priority_ms = config.priority_tick_ms,
                normal_ms = config.normal_tick_ms,
                "Bus pump started"
            );

            loop {
                tokio::select! {
                    biased;

                    () = listener.wait() => break,

                    _ = priority.tick() => {
                        let drained = bus.drain_priority();
                        if drained > 0 {
                            debug!(drained, "Priority queue drained");
                        }
                    }

                    _ = normal.tick() => {
                        let drained = bus.drain_normal();
                        if drained > 0 {
                            debug!(drained, "Normal queue drained");
                        }
                    }

                    _ = cleanup.tick() => {
                        bus.cleanup();
                    }
                }
            }

            info!("Bus pump stopped");
        });
        *pump = Some(handle);
    }

    /// Whether the pump task has been started and not shut down.
    pub fn is_running(&self) -> bool {
        self.pump.lock().is_some()
    }

    /// Stop the pump and close every agent connection.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Bus pump ended abnormally");
            }
        }
        self.close_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::{BusConfig, CommunicationBus};
    use convoy_core::{kinds, BusMessage, Priority};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> BusConfig {
        BusConfig {
            priority_tick_ms: 100,
            normal_tick_ms: 1_000,
            ..BusConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_drains_before_normal_tick() {
        let bus = Arc::new(CommunicationBus::with_default_channels(fast_config()));
        bus.start();
        // Let the immediate first ticks fire on empty queues.
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.publish(
            BusMessage::new(kinds::PERFORMANCE_ALERT, "monitor", json!({}))
                .with_priority(Priority::Critical),
        );
        bus.publish(BusMessage::new(kinds::WORKFLOW_UPDATE, "orchestrator", json!({})));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stats = bus.stats();
        assert_eq!(stats.priority_queue_len, 0);
        assert_eq!(stats.normal_queue_len, 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(bus.stats().normal_queue_len, 0);
        assert_eq!(bus.stats().processed, 2);

        bus.shutdown().await;
        assert!(!bus.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_coincident_ticks_drain_priority_first() {
        let bus = Arc::new(CommunicationBus::with_default_channels(fast_config()));
        bus.start();
        tokio::time::sleep(Duration::from_millis(950)).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let agent = bus.connect(tx);
        bus.join_channel(agent, "urgent").unwrap();
        let welcome: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(welcome["type"], kinds::WELCOME);

        // Both queues hold one message when the 1000ms ticks coincide.
        bus.publish(BusMessage::new(kinds::ERROR_REPORT, "orchestrator", json!({"n": "normal"})));
        bus.publish(
            BusMessage::new(kinds::PERFORMANCE_ALERT, "monitor", json!({"n": "prio"}))
                .with_priority(Priority::Critical),
        );
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let order: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| serde_json::from_str::<serde_json::Value>(&f).unwrap())
            .map(|f| f["content"]["n"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["prio", "normal"]);

        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_draining() {
        let bus = Arc::new(CommunicationBus::with_default_channels(fast_config()));
        bus.start();
        bus.shutdown().await;

        bus.publish(
            BusMessage::new(kinds::ERROR_REPORT, "orchestrator", json!({}))
                .with_priority(Priority::High),
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bus.stats().priority_queue_len, 1);

        // A stopped bus does not restart.
        bus.start();
        assert!(!bus.is_running());
    }
}
