use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::DestinationRegistry;

/// Periodic device-state garbage collector.
///
/// Runs on its own timer so the admission hot path never pays for
/// sweeping; each tick takes each destination's lock briefly. Sweeping is
/// advisory: it bounds memory under device churn and feeds monitoring,
/// correctness never depends on it.
pub struct StalenessSweeper {
    registry: Arc<DestinationRegistry>,
    interval: Duration,
    stale_after: Duration,
}

impl StalenessSweeper {
    pub fn new(
        registry: Arc<DestinationRegistry>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry,
            interval,
            stale_after,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        let stale_after = jiff::SignedDuration::try_from(self.stale_after)
            .unwrap_or(jiff::SignedDuration::MAX);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("staleness sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let cutoff = jiff::Timestamp::now()
                        .checked_sub(stale_after)
                        .unwrap_or(jiff::Timestamp::MIN);
                    let swept = self.registry.evict_stale(cutoff);
                    let total: usize = swept.iter().map(|(_, n)| n).sum();
                    if total > 0 {
                        info!(total, "evicted stale device state");
                    } else {
                        debug!("sweep found no stale device state");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cotrelay_core::{DestinationId, RawEvent};
    use tokio_util::sync::CancellationToken;

    use super::StalenessSweeper;
    use crate::queue::QueueConfig;
    use crate::registry::DestinationRegistry;

    #[tokio::test]
    async fn sweeper_evicts_drained_device_state() {
        let registry = Arc::new(DestinationRegistry::new());
        let id = DestinationId::new();
        registry.open(id, QueueConfig::default());

        registry
            .admit(
                id,
                &[RawEvent::new(
                    r#"{"uid":"a","time":"2026-01-01T00:00:01Z"}"#,
                )],
            )
            .unwrap();
        registry.drain(id).unwrap().unwrap();
        assert_eq!(registry.metrics(id).unwrap().tracked_devices, 1);

        let sweeper = StalenessSweeper::new(
            Arc::clone(&registry),
            Duration::from_millis(10),
            // Zero window: anything unqueued is stale at the next tick.
            Duration::ZERO,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(registry.metrics(id).unwrap().tracked_devices, 0);
    }
}
