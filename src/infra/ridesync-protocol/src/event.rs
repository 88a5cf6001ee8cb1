use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::CanonicalStatus;

/// A change in a trip's canonical status, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub trip_id: String,
    /// Last cached status, `None` when nothing was known for the trip.
    pub previous: Option<CanonicalStatus>,
    pub status: CanonicalStatus,
    /// Document snapshot that produced the change. Absent on deletion and
    /// on listener errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Listener error message for synthesized `unknown` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub fn new(
        trip_id: impl Into<String>,
        previous: Option<CanonicalStatus>,
        status: CanonicalStatus,
        raw: Option<Value>,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            previous,
            status,
            raw,
            error: None,
            at: Utc::now(),
        }
    }

    /// Event reported when the realtime listener itself fails.
    pub fn listener_error(
        trip_id: impl Into<String>,
        previous: Option<CanonicalStatus>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(trip_id, previous, CanonicalStatus::Unknown, None)
        }
    }
}
