use serde::{Deserialize, Serialize};

use crate::event::StatusChangeEvent;
use crate::status::CanonicalStatus;

/// Message sent over a trip watch WebSocket as a text frame.
///
/// Discriminated by `type`:
/// - `snapshot`: status known when the watch was opened
/// - `status`: a status change
/// - `error`: the watch cannot continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchMessage {
    Snapshot {
        trip_id: String,
        status: CanonicalStatus,
    },
    Status(StatusChangeEvent),
    Error {
        message: String,
    },
}

/// Encode a `WatchMessage` to a JSON string for sending as a text WS frame.
pub fn encode_watch(msg: &WatchMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Decode a `WatchMessage` from a JSON string received as a text WS frame.
pub fn decode_watch(text: &str) -> Result<WatchMessage, serde_json::Error> {
    serde_json::from_str(text)
}
