use std::collections::HashMap;

use cotrelay_core::DeviceId;

/// Slab slot index of a device's currently queued event. Stable while the
/// event is queued, so removal never scans the drain order.
pub type SlotToken = usize;

#[derive(Debug, Clone, Copy)]
pub struct DeviceState {
    /// Newest source-reported time admitted for this device.
    pub latest_event_time: jiff::Timestamp,
    /// Slot of the queued event, or `None` once drained.
    pub slot: Option<SlotToken>,
    /// Local time of the last accepted admission; staleness sweeping keys
    /// off this, not off source-reported time.
    pub last_seen: jiff::Timestamp,
}

/// Authoritative per-device record of what is already admitted, keyed by
/// device identity. One table per destination queue; guarded by the
/// queue's lock.
#[derive(Debug, Default)]
pub struct DeviceStateTable {
    entries: HashMap<DeviceId, DeviceState>,
}

impl DeviceStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, device_id: &DeviceId) -> Option<&DeviceState> {
        self.entries.get(device_id)
    }

    /// Unconditional overwrite of a device's record.
    pub fn record(
        &mut self,
        device_id: DeviceId,
        latest_event_time: jiff::Timestamp,
        slot: Option<SlotToken>,
        last_seen: jiff::Timestamp,
    ) {
        self.entries.insert(
            device_id,
            DeviceState {
                latest_event_time,
                slot,
                last_seen,
            },
        );
    }

    /// Forget the queue position after a drain; the timestamp record
    /// stays so the table still knows the device.
    pub fn mark_unqueued(&mut self, device_id: &DeviceId) {
        if let Some(state) = self.entries.get_mut(device_id) {
            state.slot = None;
        }
    }

    /// Drop devices with no accepted admission since `cutoff`. Devices
    /// that still hold a queued event are never swept; this bounds memory
    /// under device churn, it is not required for correctness.
    pub fn evict_stale(&mut self, cutoff: jiff::Timestamp) -> Vec<DeviceId> {
        let mut evicted = Vec::new();
        self.entries.retain(|device_id, state| {
            if state.slot.is_none() && state.last_seen < cutoff {
                evicted.push(device_id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
