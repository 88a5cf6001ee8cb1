use std::sync::Arc;

use crate::booking::{BookingCanceler, CancelSettings};
use crate::config::SyncConfig;
use crate::payment::PaymentBackend;
use crate::status::StatusRegistry;
use crate::storage::TripStore;

/// Composition root: one of each service per process, wired explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub config: SyncConfig,
    pub store: Arc<dyn TripStore>,
    pub registry: StatusRegistry,
    pub canceler: BookingCanceler,
}

impl AppContext {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn TripStore>,
        payments: Arc<dyn PaymentBackend>,
    ) -> Self {
        let registry = StatusRegistry::new(store.clone(), config.trips_collection.clone());
        let canceler =
            BookingCanceler::new(store.clone(), payments, CancelSettings::from(&config));
        Self {
            config,
            store,
            registry,
            canceler,
        }
    }
}
