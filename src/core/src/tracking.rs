use std::time::Duration;

use ridesync_protocol::CanonicalStatus;
use serde::{Deserialize, Serialize};

/// Which location stream the client should keep open for a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Waiting for a driver; nothing to track yet.
    Idle,
    DriverApproach,
    DriverAtPickup,
    InTrip,
    Stopped,
}

impl TrackingMode {
    pub fn for_status(status: CanonicalStatus) -> Self {
        match status {
            CanonicalStatus::Requested => Self::Idle,
            CanonicalStatus::Accepted => Self::DriverApproach,
            CanonicalStatus::DriverArrived => Self::DriverAtPickup,
            CanonicalStatus::Started => Self::InTrip,
            CanonicalStatus::Completed
            | CanonicalStatus::PassengerCancelled
            | CanonicalStatus::DriverCancelled
            | CanonicalStatus::Cancelled
            | CanonicalStatus::Unknown => Self::Stopped,
        }
    }

    pub fn watches_driver(&self) -> bool {
        matches!(
            self,
            Self::DriverApproach | Self::DriverAtPickup | Self::InTrip
        )
    }

    /// How often the driver location should be refreshed, if at all.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self {
            Self::DriverApproach => Some(Duration::from_secs(5)),
            Self::DriverAtPickup => Some(Duration::from_secs(10)),
            Self::InTrip => Some(Duration::from_secs(3)),
            Self::Idle | Self::Stopped => None,
        }
    }
}

/// Tracking mode for a canonical trip status.
pub fn select_tracking_mode(status: CanonicalStatus) -> TrackingMode {
    TrackingMode::for_status(status)
}
