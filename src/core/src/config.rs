use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::fare::FareSchedule;

/// Runtime configuration for the synchronizer and the gateway.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Gateway bind address (default: 127.0.0.1:9810).
    pub bind: SocketAddr,
    /// Collection holding trip records.
    pub trips_collection: String,
    /// Collection holding shadow reservation records.
    pub reservations_collection: String,
    /// Grace period before hard deletion, cancelled from the upcoming rides list.
    pub upcoming_rides_grace: Duration,
    /// Grace period before hard deletion, cancelled from the trip details screen.
    pub trip_details_grace: Duration,
    /// Base URL of the payment backend (e.g. `https://pay.example.com/api/`).
    pub payment_base_url: String,
    /// Timeout for a single payment backend request.
    pub payment_timeout: Duration,
    /// Reason recorded when the passenger gives none.
    pub default_cancel_reason: String,
    pub fare: FareSchedule,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9810),
            trips_collection: "trips".to_string(),
            reservations_collection: "Reservations".to_string(),
            upcoming_rides_grace: Duration::from_secs(5),
            trip_details_grace: Duration::from_secs(25),
            payment_base_url: "http://127.0.0.1:4242/".to_string(),
            payment_timeout: Duration::from_secs(10),
            default_cancel_reason: "Cancelled by passenger".to_string(),
            fare: FareSchedule::default(),
        }
    }
}
