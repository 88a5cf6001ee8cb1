use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use ridesync_protocol::{
    fields, normalize, normalize_document, payment_reference, CanonicalStatus,
};
use serde_json::Value;

use super::types::{
    Booking, CancelError, CancelOrigin, CancelReport, CancelSettings, DeletionOutcome,
    PaymentRelease,
};
use crate::payment::PaymentBackend;
use crate::storage::{FieldUpdate, TripStore};

const CANCELLED: &str = "cancelled";
const PASSENGER: &str = "passenger";

/// Runs the passenger cancellation sequence for scheduled bookings.
///
/// Only marking the trip cancelled can fail the operation; payment release,
/// shadow-record cleanup and the deferred deletion are best effort.
#[derive(Clone)]
pub struct BookingCanceler {
    store: Arc<dyn TripStore>,
    payments: Arc<dyn PaymentBackend>,
    settings: CancelSettings,
}

impl BookingCanceler {
    pub fn new(
        store: Arc<dyn TripStore>,
        payments: Arc<dyn PaymentBackend>,
        settings: CancelSettings,
    ) -> Self {
        Self {
            store,
            payments,
            settings,
        }
    }

    pub fn settings(&self) -> &CancelSettings {
        &self.settings
    }

    /// Cancel a booking. True once the trip record has been marked cancelled.
    pub async fn cancel_booking(&self, booking: &Booking, origin: CancelOrigin) -> bool {
        match self.cancel_booking_detailed(booking, origin).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(trip_id = %booking.trip_id, error = %err, "booking cancellation failed");
                false
            }
        }
    }

    /// Cancel a booking and report every side effect.
    pub async fn cancel_booking_detailed(
        &self,
        booking: &Booking,
        origin: CancelOrigin,
    ) -> Result<CancelReport, CancelError> {
        let trip_id = booking.trip_id.trim();
        if trip_id.is_empty() {
            return Err(CancelError::MissingTripId);
        }

        let payment_ref = self.resolve_payment_ref(trip_id, booking);
        let payment = match payment_ref.as_deref() {
            Some(reference) => self.release_payment(trip_id, reference).await,
            None => {
                tracing::debug!(%trip_id, "no payment reference to release");
                PaymentRelease::NoReference
            }
        };

        self.mark_cancelled(trip_id, booking)?;

        let shadow_deleted = self.delete_shadow(trip_id);

        let booking_status = booking
            .status
            .as_deref()
            .map(|raw| normalize(raw, None));
        let grace = self.settings.grace_for(origin);
        let deletion = tokio::spawn(delete_after_grace(
            self.store.clone(),
            self.settings.trips_collection.clone(),
            trip_id.to_string(),
            grace,
        ));

        tracing::info!(
            %trip_id,
            ?origin,
            ?payment,
            shadow_deleted,
            ?booking_status,
            scheduled_pickup_at = ?booking.scheduled_pickup_at,
            grace_secs = grace.as_secs(),
            "booking cancelled by passenger"
        );

        Ok(CancelReport {
            trip_id: trip_id.to_string(),
            payment_ref,
            payment,
            shadow_deleted,
            booking_status,
            scheduled_pickup_at: booking.scheduled_pickup_at,
            grace,
            deletion,
        })
    }

    /// The booking's own reference, else the first stray trip record that
    /// carries one: by document id, then by `tripId`, then by `id`.
    fn resolve_payment_ref(&self, trip_id: &str, booking: &Booking) -> Option<String> {
        let own = booking
            .payment_intent_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if let Some(reference) = own {
            return Some(reference.to_string());
        }

        let collection = &self.settings.trips_collection;
        match self.store.get(collection, trip_id) {
            Ok(Some(doc)) => {
                if let Some(reference) = payment_reference(&doc) {
                    return Some(reference.to_string());
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "payment lookup by document id failed");
            }
        }

        let key = Value::String(trip_id.to_string());
        for field in [fields::TRIP_ID, fields::ID] {
            match self.store.query_eq(collection, field, &key) {
                Ok(hits) => {
                    if let Some(reference) = hits.iter().find_map(|(_, doc)| payment_reference(doc)) {
                        return Some(reference.to_string());
                    }
                }
                Err(err) => {
                    tracing::warn!(%trip_id, field, error = %err, "payment lookup failed");
                }
            }
        }

        None
    }

    async fn release_payment(&self, trip_id: &str, reference: &str) -> PaymentRelease {
        let call = self.payments.cancel_payment(reference, trip_id);
        match tokio::time::timeout(self.settings.payment_timeout, call).await {
            Ok(Ok(true)) => PaymentRelease::Released,
            Ok(Ok(false)) => {
                tracing::warn!(%trip_id, payment_ref = %reference, "payment backend refused release");
                PaymentRelease::Refused
            }
            Ok(Err(err)) => {
                tracing::warn!(%trip_id, payment_ref = %reference, error = %err, "payment release failed");
                PaymentRelease::Failed(err.to_string())
            }
            Err(_) => {
                tracing::warn!(%trip_id, payment_ref = %reference, "payment release timed out");
                PaymentRelease::Failed("timed out".to_string())
            }
        }
    }

    fn mark_cancelled(&self, trip_id: &str, booking: &Booking) -> Result<(), CancelError> {
        let reason = booking
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.settings.default_reason.as_str());
        let changes = cancellation_changes(reason);
        self.store
            .update(&self.settings.trips_collection, trip_id, &changes)
            .map_err(|source| CancelError::Mutation {
                trip_id: trip_id.to_string(),
                source,
            })
    }

    fn delete_shadow(&self, trip_id: &str) -> bool {
        match self
            .store
            .delete(&self.settings.reservations_collection, trip_id)
        {
            Ok(existed) => existed,
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "failed to delete reservation record");
                false
            }
        }
    }
}

/// Field mutations that mark a trip cancelled by the passenger.
fn cancellation_changes(reason: &str) -> Vec<(String, FieldUpdate)> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut changes = vec![
        (fields::STATUS.to_string(), FieldUpdate::set(CANCELLED)),
        (fields::STATE.to_string(), FieldUpdate::set(CANCELLED)),
        (fields::CANCELLED_BY.to_string(), FieldUpdate::set(PASSENGER)),
        (fields::CANCELLATION_REASON.to_string(), FieldUpdate::set(reason)),
        (fields::CANCELLED_AT.to_string(), FieldUpdate::set(now)),
    ];
    changes.extend(
        fields::DRIVER_ASSIGNMENT
            .iter()
            .map(|field| (field.to_string(), FieldUpdate::Delete)),
    );
    changes
}

/// Hard-delete the trip after `grace`, unless it moved on from the
/// passenger-cancelled state in the meantime.
async fn delete_after_grace(
    store: Arc<dyn TripStore>,
    collection: String,
    trip_id: String,
    grace: Duration,
) -> DeletionOutcome {
    tokio::time::sleep(grace).await;

    let doc = match store.get(&collection, &trip_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return DeletionOutcome::Missing,
        Err(err) => {
            tracing::warn!(%trip_id, error = %err, "deferred deletion lookup failed");
            return DeletionOutcome::Failed(err.to_string());
        }
    };

    let status = normalize_document(&doc);
    if status != CanonicalStatus::PassengerCancelled {
        tracing::info!(%trip_id, %status, "trip changed after cancellation; keeping record");
        return DeletionOutcome::Skipped(status);
    }

    match store.delete(&collection, &trip_id) {
        Ok(true) => {
            tracing::debug!(%trip_id, "cancelled trip deleted");
            DeletionOutcome::Deleted
        }
        Ok(false) => DeletionOutcome::Missing,
        Err(err) => {
            tracing::warn!(%trip_id, error = %err, "deferred deletion failed");
            DeletionOutcome::Failed(err.to_string())
        }
    }
}
