use serde_json::{Map, Value};

use crate::status::{normalize, CanonicalStatus};

/// A backing-store document: a flat JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Well-known trip record field names.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const STATE: &str = "state";
    pub const CANCELLED_BY: &str = "cancelledBy";
    pub const CANCELLATION_REASON: &str = "cancellationReason";
    pub const CANCELLED_AT: &str = "cancelledAt";
    pub const SCHEDULED_PICKUP_AT: &str = "scheduledPickupAt";
    pub const TRIP_ID: &str = "tripId";
    pub const ID: &str = "id";

    /// Payment reference fields, in lookup order.
    pub const PAYMENT_REFERENCE: &[&str] =
        &["paymentIntentId", "payment_intent_id", "stripePaymentIntentId"];

    /// Fields describing the assigned (or pending) driver.
    pub const DRIVER_ASSIGNMENT: &[&str] = &[
        "driverId",
        "driverName",
        "driverVehicle",
        "driverPhone",
        "driverImage",
        "pendingDriverId",
        "pendingAssignment",
    ];
}

/// Raw state of a trip record: `state` wins, `status` is the fallback.
///
/// Empty strings are treated as absent.
pub fn raw_state(doc: &Document) -> Option<&str> {
    non_empty_str(doc, fields::STATE).or_else(|| non_empty_str(doc, fields::STATUS))
}

/// Cancelling party recorded on a trip, if any.
pub fn cancelled_by(doc: &Document) -> Option<&str> {
    non_empty_str(doc, fields::CANCELLED_BY)
}

/// Canonical status of a trip record.
pub fn normalize_document(doc: &Document) -> CanonicalStatus {
    match raw_state(doc) {
        Some(raw) => normalize(raw, cancelled_by(doc)),
        None => CanonicalStatus::Unknown,
    }
}

/// First non-empty payment reference carried by a record.
pub fn payment_reference(doc: &Document) -> Option<&str> {
    fields::PAYMENT_REFERENCE
        .iter()
        .find_map(|field| non_empty_str(doc, field))
}

fn non_empty_str<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
