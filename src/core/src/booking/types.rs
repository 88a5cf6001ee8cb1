use std::time::Duration;

use chrono::{DateTime, Utc};
use ridesync_protocol::{CanonicalStatus, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;

/// A passenger booking as the UI knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub trip_id: String,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    /// Raw status as last shown to the passenger.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub scheduled_pickup_at: Option<DateTime<Utc>>,
    /// Reason given by the passenger; the configured default otherwise.
    #[serde(default)]
    pub reason: Option<String>,
}

impl Booking {
    pub fn new(trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            ..Self::default()
        }
    }
}

/// Screen the cancellation was started from. Each one keeps its own grace
/// period before the trip record is hard-deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOrigin {
    #[default]
    UpcomingRides,
    TripDetails,
}

/// Canceler settings, derived from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct CancelSettings {
    pub trips_collection: String,
    pub reservations_collection: String,
    pub upcoming_rides_grace: Duration,
    pub trip_details_grace: Duration,
    pub payment_timeout: Duration,
    pub default_reason: String,
}

impl CancelSettings {
    pub fn grace_for(&self, origin: CancelOrigin) -> Duration {
        match origin {
            CancelOrigin::UpcomingRides => self.upcoming_rides_grace,
            CancelOrigin::TripDetails => self.trip_details_grace,
        }
    }
}

impl From<&SyncConfig> for CancelSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            trips_collection: config.trips_collection.clone(),
            reservations_collection: config.reservations_collection.clone(),
            upcoming_rides_grace: config.upcoming_rides_grace,
            trip_details_grace: config.trip_details_grace,
            payment_timeout: config.payment_timeout,
            default_reason: config.default_cancel_reason.clone(),
        }
    }
}

/// What happened to the payment authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRelease {
    NoReference,
    Released,
    Refused,
    Failed(String),
}

/// Result of the deferred hard deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    /// The trip changed again before the grace period ran out.
    Skipped(CanonicalStatus),
    Missing,
    Failed(String),
}

/// Everything a successful cancellation did.
#[derive(Debug)]
pub struct CancelReport {
    pub trip_id: String,
    pub payment_ref: Option<String>,
    pub payment: PaymentRelease,
    pub shadow_deleted: bool,
    /// Status the passenger saw when cancelling, normalized.
    pub booking_status: Option<CanonicalStatus>,
    pub scheduled_pickup_at: Option<DateTime<Utc>>,
    pub grace: Duration,
    /// Deferred deletion task. Dropping the handle does not cancel it.
    pub deletion: JoinHandle<DeletionOutcome>,
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("booking has no trip id")]
    MissingTripId,

    #[error("failed to mark trip {trip_id} cancelled: {source}")]
    Mutation {
        trip_id: String,
        #[source]
        source: StoreError,
    },
}
