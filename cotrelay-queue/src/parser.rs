use cotrelay_core::{DeviceId, Event, RawEvent};
use thiserror::Error;
use tracing::warn;

/// Field holding the stable device identity in a position record.
pub const IDENTITY_FIELD: &str = "uid";
/// Field holding the source-reported fix time (RFC 3339).
pub const TIME_FIELD: &str = "time";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or blank `{0}` field")]
    MissingIdentity(&'static str),
}

/// Extract `(device_id, event_time)` from a raw position report.
///
/// A missing or blank identity rejects the event outright; it must never
/// enter a queue without a device key. A missing or unparseable timestamp
/// only degrades ordering data, so the event proceeds with the local
/// receipt time and a warning.
pub fn parse_event(raw: &RawEvent) -> Result<Event, ParseError> {
    let value: serde_json::Value = serde_json::from_str(&raw.body)?;
    let record = value.as_object().ok_or(ParseError::NotAnObject)?;

    let uid = record
        .get(IDENTITY_FIELD)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingIdentity(IDENTITY_FIELD))?;

    let event_time = match record.get(TIME_FIELD).and_then(|v| v.as_str()) {
        Some(ts) => match ts.parse::<jiff::Timestamp>() {
            Ok(t) => t,
            Err(error) => {
                warn!(device_id = %uid, %error, "unparseable event time, using receipt time");
                raw.received_at
            }
        },
        None => {
            warn!(device_id = %uid, "missing event time, using receipt time");
            raw.received_at
        }
    };

    Ok(Event {
        device_id: DeviceId::from(uid),
        event_time,
        enqueue_time: raw.received_at,
        body: raw.body.clone(),
    })
}
