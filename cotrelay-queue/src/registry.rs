use std::sync::{Arc, Mutex};

use cotrelay_core::{
    AdmissionOutcome, AdmissionReport, DestinationId, Event, QueueMetricsSnapshot, RawEvent,
};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser;
use crate::queue::{QueueConfig, ReplacementQueue};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown destination {0}")]
    DestinationNotFound(DestinationId),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Process-wide table of destination queues.
///
/// Explicitly constructed and shared by handle; producers call `admit`,
/// the per-destination dispatcher calls `drain_batch`, and the node's
/// lifecycle code opens and closes destinations. Each queue has its own
/// mutex, held across a whole batch so two producers' batches never
/// interleave mid-device; independent destinations never contend.
#[derive(Default)]
pub struct DestinationRegistry {
    queues: DashMap<DestinationId, Arc<Mutex<ReplacementQueue>>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue for a destination. Returns `false` if one already
    /// exists (the existing queue is left untouched).
    pub fn open(&self, id: DestinationId, config: QueueConfig) -> bool {
        let mut inserted = false;
        self.queues.entry(id).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(ReplacementQueue::new(config)))
        });
        if inserted {
            debug!(destination_id = %id, max_devices = config.max_devices, "destination opened");
        }
        inserted
    }

    /// Tear a destination down: deregister it and discard its queued
    /// events and device state. The closed flag is set under the queue
    /// lock, so a producer that grabbed the queue handle before removal
    /// has its in-flight batch rejected rather than admitted into a dead
    /// queue.
    pub fn close(&self, id: DestinationId) -> Result<(), QueueError> {
        let (_, queue) = self
            .queues
            .remove(&id)
            .ok_or(QueueError::DestinationNotFound(id))?;
        lock(&queue)?.close();
        debug!(destination_id = %id, "destination closed");
        Ok(())
    }

    /// Admit a batch of raw events, in input order, under one lock
    /// acquisition. Parsing happens before the lock is taken; a parse
    /// failure counts against the report and never affects sibling
    /// events.
    pub fn admit(
        &self,
        id: DestinationId,
        batch: &[RawEvent],
    ) -> Result<AdmissionReport, QueueError> {
        let parsed: Vec<Result<Event, parser::ParseError>> =
            batch.iter().map(parser::parse_event).collect();

        let queue = self.queue(id)?;
        let mut queue = lock(&queue)?;

        let mut report = AdmissionReport::default();
        for event in parsed {
            match event {
                Ok(event) => {
                    let result = queue.admit(event);
                    report.record(result.outcome);
                    if let Some(device_id) = result.capacity_dropped {
                        report.dropped_capacity += 1;
                        warn!(
                            destination_id = %id,
                            %device_id,
                            "queue at capacity, evicted oldest queued event"
                        );
                    }
                }
                Err(error) => {
                    queue.note_malformed();
                    report.record(AdmissionOutcome::RejectedMalformed);
                    warn!(destination_id = %id, %error, "malformed event rejected");
                }
            }
        }

        Ok(report)
    }

    pub fn drain(&self, id: DestinationId) -> Result<Option<Event>, QueueError> {
        let queue = self.queue(id)?;
        let mut queue = lock(&queue)?;
        Ok(queue.drain())
    }

    pub fn drain_batch(&self, id: DestinationId, max_n: usize) -> Result<Vec<Event>, QueueError> {
        let queue = self.queue(id)?;
        let mut queue = lock(&queue)?;
        Ok(queue.drain_batch(max_n))
    }

    pub fn metrics(&self, id: DestinationId) -> Result<QueueMetricsSnapshot, QueueError> {
        let queue = self.queue(id)?;
        let queue = lock(&queue)?;
        Ok(queue.snapshot())
    }

    pub fn destinations(&self) -> Vec<DestinationId> {
        self.queues.iter().map(|entry| *entry.key()).collect()
    }

    pub fn contains(&self, id: DestinationId) -> bool {
        self.queues.contains_key(&id)
    }

    /// Run one staleness sweep across every destination. Returns the
    /// number of device-state entries evicted per destination.
    pub fn evict_stale(&self, cutoff: jiff::Timestamp) -> Vec<(DestinationId, usize)> {
        let mut swept = Vec::new();
        for entry in self.queues.iter() {
            let id = *entry.key();
            let Ok(mut queue) = entry.value().lock() else {
                warn!(destination_id = %id, "skipping sweep, queue mutex poisoned");
                continue;
            };
            let evicted = queue.evict_stale(cutoff);
            if !evicted.is_empty() {
                debug!(destination_id = %id, count = evicted.len(), "swept stale device state");
            }
            swept.push((id, evicted.len()));
        }
        swept
    }

    fn queue(&self, id: DestinationId) -> Result<Arc<Mutex<ReplacementQueue>>, QueueError> {
        self.queues
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(QueueError::DestinationNotFound(id))
    }
}

fn lock(
    queue: &Arc<Mutex<ReplacementQueue>>,
) -> Result<std::sync::MutexGuard<'_, ReplacementQueue>, QueueError> {
    queue
        .lock()
        .map_err(|_| QueueError::Internal("queue mutex poisoned".into()))
}

#[cfg(test)]
mod tests {
    use cotrelay_core::{DestinationId, RawEvent};

    use super::{DestinationRegistry, QueueError};
    use crate::queue::QueueConfig;

    fn raw(uid: &str, time: &str) -> RawEvent {
        RawEvent::new(format!(r#"{{"uid":"{uid}","time":"{time}"}}"#))
    }

    #[test]
    fn open_is_idempotent() {
        let registry = DestinationRegistry::new();
        let id = DestinationId::new();

        assert!(registry.open(id, QueueConfig::default()));
        assert!(!registry.open(id, QueueConfig::default()));
    }

    #[test]
    fn admit_to_unknown_destination_is_an_error() {
        let registry = DestinationRegistry::new();
        let err = registry
            .admit(DestinationId::new(), &[raw("a", "2026-01-01T00:00:00Z")])
            .unwrap_err();
        assert!(matches!(err, QueueError::DestinationNotFound(_)));
    }

    #[test]
    fn batch_report_separates_outcomes() {
        let registry = DestinationRegistry::new();
        let id = DestinationId::new();
        registry.open(id, QueueConfig::default());

        let batch = vec![
            raw("a", "2026-01-01T00:00:01Z"),
            raw("a", "2026-01-01T00:00:02Z"),
            raw("a", "2026-01-01T00:00:01Z"),
            RawEvent::new(r#"{"time":"2026-01-01T00:00:03Z"}"#),
            raw("b", "2026-01-01T00:00:04Z"),
        ];
        let report = registry.admit(id, &batch).unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.rejected_stale, 1);
        assert_eq!(report.rejected_malformed, 1);
        assert_eq!(registry.metrics(id).unwrap().queued_devices, 2);
    }

    #[test]
    fn close_discards_and_deregisters() {
        let registry = DestinationRegistry::new();
        let id = DestinationId::new();
        registry.open(id, QueueConfig::default());
        registry
            .admit(id, &[raw("a", "2026-01-01T00:00:01Z")])
            .unwrap();

        registry.close(id).unwrap();

        assert!(!registry.contains(id));
        assert!(matches!(
            registry.drain(id).unwrap_err(),
            QueueError::DestinationNotFound(_)
        ));
        assert!(matches!(
            registry.close(id).unwrap_err(),
            QueueError::DestinationNotFound(_)
        ));
    }

    #[test]
    fn destinations_are_independent() {
        let registry = DestinationRegistry::new();
        let left = DestinationId::new();
        let right = DestinationId::new();
        registry.open(left, QueueConfig::default());
        registry.open(right, QueueConfig::default());

        registry
            .admit(left, &[raw("a", "2026-01-01T00:00:01Z")])
            .unwrap();

        assert_eq!(registry.metrics(left).unwrap().queued_devices, 1);
        assert_eq!(registry.metrics(right).unwrap().queued_devices, 0);
    }
}
