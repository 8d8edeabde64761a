use cotrelay_core::{
    AdmissionOutcome, AdmissionReport, DeviceId, Event, QueueMetricsSnapshot,
};
use serde::{Deserialize, Serialize};

use crate::state::{DeviceStateTable, SlotToken};

/// Per-destination queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum distinct devices queued at once. A new device arriving at
    /// capacity evicts the oldest queued event (a CapacityDrop).
    pub max_devices: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_devices: 4096 }
    }
}

/// Result of admitting one parsed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitResult {
    pub outcome: AdmissionOutcome,
    /// Device whose oldest-in-queue event was evicted to make room, if
    /// this admission pushed the queue over capacity.
    pub capacity_dropped: Option<DeviceId>,
}

#[derive(Debug)]
struct Slot {
    event: Event,
    prev: Option<SlotToken>,
    next: Option<SlotToken>,
}

/// Device-keyed replacement queue for one destination.
///
/// Holds at most one event per device, always the newest-known one.
/// Drain order is FIFO over admission: a device enters the order when
/// first accepted and moves to the tail on every replacement. Events live
/// in a slab so the device state table's slot token removes a replaced
/// event without scanning.
///
/// Not internally synchronized; the registry wraps each queue in a mutex
/// and holds it across whole batches.
#[derive(Debug)]
pub struct ReplacementQueue {
    slots: Vec<Option<Slot>>,
    free: Vec<SlotToken>,
    head: Option<SlotToken>,
    tail: Option<SlotToken>,
    len: usize,
    config: QueueConfig,
    devices: DeviceStateTable,
    closed: bool,
    totals: AdmissionReport,
    drained: u64,
}

impl ReplacementQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            config,
            devices: DeviceStateTable::new(),
            closed: false,
            totals: AdmissionReport::default(),
            drained: 0,
        }
    }

    /// Apply the admission algorithm to one parsed event.
    pub fn admit(&mut self, event: Event) -> AdmitResult {
        if self.closed {
            self.totals.dropped_closed += 1;
            return AdmitResult {
                outcome: AdmissionOutcome::DroppedClosed,
                capacity_dropped: None,
            };
        }

        let queued = self
            .devices
            .lookup(&event.device_id)
            .and_then(|state| state.slot.map(|slot| (state.latest_event_time, slot)));

        match queued {
            Some((latest_event_time, slot)) => {
                if latest_event_time > event.event_time {
                    // Out-of-order redelivery; the queued event is newer.
                    self.totals.rejected_stale += 1;
                    return AdmitResult {
                        outcome: AdmissionOutcome::RejectedStale,
                        capacity_dropped: None,
                    };
                }

                // Equal timestamps replace too: the newest arrival wins.
                self.unlink(slot);
                self.insert_tail(event);
                self.totals.replaced += 1;
                AdmitResult {
                    outcome: AdmissionOutcome::Replaced,
                    capacity_dropped: None,
                }
            }
            None => {
                let capacity_dropped = if self.len >= self.config.max_devices {
                    self.evict_oldest()
                } else {
                    None
                };

                self.insert_tail(event);
                self.totals.accepted += 1;
                if capacity_dropped.is_some() {
                    self.totals.dropped_capacity += 1;
                }
                AdmitResult {
                    outcome: AdmissionOutcome::Accepted,
                    capacity_dropped,
                }
            }
        }
    }

    /// Count a parse rejection against this queue's totals. The event
    /// never existed as far as the drain order is concerned.
    pub fn note_malformed(&mut self) {
        self.totals.rejected_malformed += 1;
    }

    /// Remove and return the oldest queued event. The device stays
    /// tracked but unqueued, so its next admission is a fresh insert.
    pub fn drain(&mut self) -> Option<Event> {
        let head = self.head?;
        let event = self.unlink(head);
        self.devices.mark_unqueued(&event.device_id);
        self.drained += 1;
        Some(event)
    }

    pub fn drain_batch(&mut self, max_n: usize) -> Vec<Event> {
        let mut batch = Vec::with_capacity(max_n.min(self.len));
        while batch.len() < max_n {
            match self.drain() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }

    /// Tear the queue down: discard every queued event and all device
    /// state, and reject admissions from here on.
    pub fn close(&mut self) {
        self.closed = true;
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.devices.clear();
    }

    /// Drop device-state entries for unqueued devices not seen since
    /// `cutoff`. Advisory; bounds memory under device churn.
    pub fn evict_stale(&mut self, cutoff: jiff::Timestamp) -> Vec<DeviceId> {
        self.devices.evict_stale(cutoff)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            totals: self.totals,
            drained: self.drained,
            queued_devices: self.len,
            tracked_devices: self.devices.len(),
            capacity: self.config.max_devices,
            closed: self.closed,
        }
    }

    /// Link an event at the tail of the drain order and record its slot
    /// in the device state table.
    fn insert_tail(&mut self, event: Event) {
        let device_id = event.device_id.clone();
        let event_time = event.event_time;
        let enqueue_time = event.enqueue_time;

        let slot = Slot {
            event,
            prev: self.tail,
            next: None,
        };
        let token = match self.free.pop() {
            Some(token) => {
                self.slots[token] = Some(slot);
                token
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        if let Some(tail) = self.tail
            && let Some(tail_slot) = self.slots[tail].as_mut()
        {
            tail_slot.next = Some(token);
        }
        self.tail = Some(token);
        if self.head.is_none() {
            self.head = Some(token);
        }
        self.len += 1;

        self.devices
            .record(device_id, event_time, Some(token), enqueue_time);
    }

    /// Unlink a slot from the drain order and return its event.
    fn unlink(&mut self, token: SlotToken) -> Event {
        let slot = self.slots[token]
            .take()
            .unwrap_or_else(|| unreachable!("token {token} points at an empty slot"));

        match slot.prev {
            Some(prev) => {
                if let Some(prev_slot) = self.slots[prev].as_mut() {
                    prev_slot.next = slot.next;
                }
            }
            None => self.head = slot.next,
        }
        match slot.next {
            Some(next) => {
                if let Some(next_slot) = self.slots[next].as_mut() {
                    next_slot.prev = slot.prev;
                }
            }
            None => self.tail = slot.prev,
        }

        self.free.push(token);
        self.len -= 1;
        slot.event
    }

    fn evict_oldest(&mut self) -> Option<DeviceId> {
        let head = self.head?;
        let event = self.unlink(head);
        self.devices.mark_unqueued(&event.device_id);
        Some(event.device_id)
    }
}

impl Default for ReplacementQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
