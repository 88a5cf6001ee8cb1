use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::SyncConfig;
use crate::paths::ridesync_config_path;

/// File-backed settings from `~/.ridesync/config.toml`.
///
/// Every section is optional; missing keys keep the [`SyncConfig`] defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RideSyncConfig {
    pub version: u32,
    pub store: StoreConfig,
    pub cancellation: CancellationConfig,
    pub payment: PaymentConfig,
    pub fare: FareConfig,
}

impl Default for RideSyncConfig {
    fn default() -> Self {
        Self {
            version: 1,
            store: StoreConfig::default(),
            cancellation: CancellationConfig::default(),
            payment: PaymentConfig::default(),
            fare: FareConfig::default(),
        }
    }
}

impl RideSyncConfig {
    pub fn load() -> Result<Self, String> {
        let path = ridesync_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        ridesync_config_path()
    }

    /// Layer these settings on top of `base`.
    pub fn apply(&self, mut base: SyncConfig) -> SyncConfig {
        if let Some(name) = non_empty(&self.store.trips_collection) {
            base.trips_collection = name;
        }
        if let Some(name) = non_empty(&self.store.reservations_collection) {
            base.reservations_collection = name;
        }
        if let Some(secs) = self.cancellation.upcoming_rides_grace_secs {
            base.upcoming_rides_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cancellation.trip_details_grace_secs {
            base.trip_details_grace = Duration::from_secs(secs);
        }
        if let Some(reason) = non_empty(&self.cancellation.default_reason) {
            base.default_cancel_reason = reason;
        }
        if let Some(url) = non_empty(&self.payment.base_url) {
            base.payment_base_url = url;
        }
        if let Some(secs) = self.payment.timeout_secs {
            base.payment_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = self.fare.base {
            base.fare.base = v;
        }
        if let Some(v) = self.fare.per_km {
            base.fare.per_km = v;
        }
        if let Some(v) = self.fare.per_minute {
            base.fare.per_minute = v;
        }
        if let Some(v) = self.fare.minimum {
            base.fare.minimum = v;
        }
        if let Some(currency) = non_empty(&self.fare.currency) {
            base.fare.currency = currency;
        }
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: Option<String>,
    pub trips_collection: String,
    pub reservations_collection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CancellationConfig {
    pub upcoming_rides_grace_secs: Option<u64>,
    pub trip_details_grace_secs: Option<u64>,
    pub default_reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub base_url: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FareConfig {
    pub base: Option<f64>,
    pub per_km: Option<f64>,
    pub per_minute: Option<f64>,
    pub minimum: Option<f64>,
    pub currency: String,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
