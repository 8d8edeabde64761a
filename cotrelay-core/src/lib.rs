use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

type BoxStr = Box<str>;

/// Stable identity of a tracked device, extracted from inbound position
/// reports. Sources choose the format (serial number, callsign, UID); the
/// queue only requires that it is stable across reports for one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub BoxStr);

impl DeviceId {
    pub fn new(id: impl Into<BoxStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an outbound destination (one TAK server endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub Ulid);

impl DestinationId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DestinationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One inbound position report as produced by a plugin poll, before
/// identity and timestamp extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub body: BoxStr,
    pub received_at: jiff::Timestamp,
}

impl RawEvent {
    /// Wrap a payload, stamping the local receipt time.
    pub fn new(body: impl Into<BoxStr>) -> Self {
        Self {
            body: body.into(),
            received_at: jiff::Timestamp::now(),
        }
    }

    /// Wrap a payload with an explicit receipt time.
    pub fn with_receipt(body: impl Into<BoxStr>, received_at: jiff::Timestamp) -> Self {
        Self {
            body: body.into(),
            received_at,
        }
    }
}

/// A parsed position report. Immutable once constructed; the queue never
/// interprets `body`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub device_id: DeviceId,
    /// Source-reported time of the position fix.
    pub event_time: jiff::Timestamp,
    /// Local receipt time; drain order is derived from admission order,
    /// which follows this.
    pub enqueue_time: jiff::Timestamp,
    pub body: BoxStr,
}

/// Per-event admission fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionOutcome {
    /// First queued event for a device.
    Accepted,
    /// Evicted an older queued event for the same device.
    Replaced,
    /// Older than the currently queued event for the device; dropped.
    RejectedStale,
    /// No extractable device identity; dropped before queueing.
    RejectedMalformed,
    /// Admission raced a destination teardown; dropped.
    DroppedClosed,
}

/// Outcome counts for one admission call (or, accumulated, for a queue's
/// lifetime). `dropped_capacity` counts oldest-event evictions forced by
/// new devices arriving at a full queue; the arriving event itself is
/// accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionReport {
    pub accepted: u64,
    pub replaced: u64,
    pub rejected_stale: u64,
    pub rejected_malformed: u64,
    pub dropped_capacity: u64,
    pub dropped_closed: u64,
}

impl AdmissionReport {
    pub fn record(&mut self, outcome: AdmissionOutcome) {
        match outcome {
            AdmissionOutcome::Accepted => self.accepted += 1,
            AdmissionOutcome::Replaced => self.replaced += 1,
            AdmissionOutcome::RejectedStale => self.rejected_stale += 1,
            AdmissionOutcome::RejectedMalformed => self.rejected_malformed += 1,
            AdmissionOutcome::DroppedClosed => self.dropped_closed += 1,
        }
    }

    pub fn merge(&mut self, other: &AdmissionReport) {
        self.accepted += other.accepted;
        self.replaced += other.replaced;
        self.rejected_stale += other.rejected_stale;
        self.rejected_malformed += other.rejected_malformed;
        self.dropped_capacity += other.dropped_capacity;
        self.dropped_closed += other.dropped_closed;
    }

    /// Events that entered the queue.
    pub fn admitted(&self) -> u64 {
        self.accepted + self.replaced
    }

    /// Events that were turned away in any way.
    pub fn dropped(&self) -> u64 {
        self.rejected_stale + self.rejected_malformed + self.dropped_capacity + self.dropped_closed
    }
}

/// Point-in-time view of one destination queue, for the observability
/// surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    /// Cumulative admission counts since the queue was opened.
    pub totals: AdmissionReport,
    /// Events handed to the dispatcher so far.
    pub drained: u64,
    /// Distinct devices currently holding a queued event.
    pub queued_devices: usize,
    /// Distinct devices ever seen and still tracked (queued or not).
    pub tracked_devices: usize,
    /// Configured distinct-device capacity.
    pub capacity: usize,
    pub closed: bool,
}
