use std::sync::Arc;
use std::time::Duration;

use cotrelay_core::DestinationId;
use cotrelay_queue::registry::{DestinationRegistry, QueueError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::TakTransport;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Poll cadence when the queue runs dry.
    pub poll_interval: Duration,
    /// Events drained per lock acquisition.
    pub batch_size: usize,
    /// Send attempts per event before it is dropped.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 32,
            max_attempts: 3,
        }
    }
}

/// Single consumer for one destination: drains the replacement queue and
/// transmits outside the queue lock. Retry-vs-drop policy lives here; the
/// queue has no opinion about an event once it is drained.
pub struct Dispatcher<T: TakTransport> {
    destination_id: DestinationId,
    registry: Arc<DestinationRegistry>,
    transport: T,
    config: DispatcherConfig,
}

impl<T: TakTransport> Dispatcher<T> {
    pub fn new(
        destination_id: DestinationId,
        registry: Arc<DestinationRegistry>,
        transport: T,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            destination_id,
            registry,
            transport,
            config,
        }
    }

    /// Drain one batch and transmit every event in it. Returns the
    /// number of events drained.
    pub async fn pump(&self) -> Result<usize, QueueError> {
        let batch = self
            .registry
            .drain_batch(self.destination_id, self.config.batch_size)?;
        let drained = batch.len();

        for event in batch {
            self.transmit(event).await;
        }

        Ok(drained)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        info!(destination_id = %self.destination_id, "dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(destination_id = %self.destination_id, "dispatcher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.pump().await {
                        // Keep pumping while full batches come back.
                        Ok(drained) if drained == self.config.batch_size => {
                            interval.reset_immediately();
                        }
                        Ok(_) => {}
                        Err(QueueError::DestinationNotFound(_)) => {
                            info!(
                                destination_id = %self.destination_id,
                                "destination closed, dispatcher stopping"
                            );
                            break;
                        }
                        Err(err) => {
                            error!(destination_id = %self.destination_id, error = %err, "drain failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn transmit(&self, event: cotrelay_core::Event) {
        for attempt in 1..=self.config.max_attempts {
            match self.transport.send(&event).await {
                Ok(()) => {
                    debug!(device_id = %event.device_id, "event transmitted");
                    return;
                }
                Err(error) => {
                    warn!(
                        destination_id = %self.destination_id,
                        device_id = %event.device_id,
                        attempt,
                        %error,
                        "transmission failed"
                    );
                }
            }
        }

        warn!(
            destination_id = %self.destination_id,
            device_id = %event.device_id,
            attempts = self.config.max_attempts,
            "dropping event after repeated transmission failures"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cotrelay_core::{DestinationId, RawEvent};
    use cotrelay_queue::queue::QueueConfig;
    use cotrelay_queue::registry::DestinationRegistry;

    use super::{Dispatcher, DispatcherConfig};
    use crate::transport::MockTakTransport;

    fn raw(uid: &str, time: &str) -> RawEvent {
        RawEvent::new(format!(r#"{{"uid":"{uid}","time":"{time}"}}"#))
    }

    fn setup() -> (Arc<DestinationRegistry>, DestinationId) {
        let registry = Arc::new(DestinationRegistry::new());
        let id = DestinationId::new();
        registry.open(id, QueueConfig::default());
        (registry, id)
    }

    #[tokio::test]
    async fn pump_transmits_drained_events_in_order() {
        let (registry, id) = setup();
        registry
            .admit(
                id,
                &[
                    raw("a", "2026-01-01T00:00:01Z"),
                    raw("b", "2026-01-01T00:00:02Z"),
                ],
            )
            .unwrap();

        let transport = MockTakTransport::new();
        let dispatcher = Dispatcher::new(
            id,
            Arc::clone(&registry),
            transport.clone(),
            DispatcherConfig::default(),
        );

        assert_eq!(dispatcher.pump().await.unwrap(), 2);
        assert_eq!(dispatcher.pump().await.unwrap(), 0);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].device_id.as_str(), "a");
        assert_eq!(sent[1].device_id.as_str(), "b");
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (registry, id) = setup();
        registry
            .admit(id, &[raw("a", "2026-01-01T00:00:01Z")])
            .unwrap();

        let transport = MockTakTransport::new();
        transport.fail_next(2);
        let dispatcher = Dispatcher::new(
            id,
            Arc::clone(&registry),
            transport.clone(),
            DispatcherConfig {
                max_attempts: 3,
                ..Default::default()
            },
        );

        dispatcher.pump().await.unwrap();

        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_drop_the_event() {
        let (registry, id) = setup();
        registry
            .admit(
                id,
                &[
                    raw("a", "2026-01-01T00:00:01Z"),
                    raw("b", "2026-01-01T00:00:02Z"),
                ],
            )
            .unwrap();

        let transport = MockTakTransport::new();
        transport.fail_next(3);
        let dispatcher = Dispatcher::new(
            id,
            Arc::clone(&registry),
            transport.clone(),
            DispatcherConfig {
                max_attempts: 3,
                ..Default::default()
            },
        );

        assert_eq!(dispatcher.pump().await.unwrap(), 2);

        // "a" burned all three attempts; "b" went through. The queue is
        // untouched either way.
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].device_id.as_str(), "b");
        assert_eq!(registry.metrics(id).unwrap().queued_devices, 0);
    }
}
