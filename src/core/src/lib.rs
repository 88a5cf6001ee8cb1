pub mod booking;
mod config;
mod context;
pub mod fare;
pub mod payment;
mod paths;
mod ridesync_config;
pub mod route;
mod server;
pub mod status;
pub mod storage;
pub mod tracking;

pub use booking::{Booking, BookingCanceler, CancelOrigin};
pub use config::SyncConfig;
pub use context::AppContext;
pub use fare::{FareEstimate, FareSchedule};
pub use paths::{ridesync_db_path, ridesync_home_dir};
pub use payment::{HttpPaymentBackend, NoopPaymentBackend, PaymentBackend};
pub use ridesync_config::RideSyncConfig;
pub use server::build_router;
pub use status::{StatusRegistry, Subscription};
pub use storage::{MemoryStore, SqliteStore, TripStore};
pub use tracking::{select_tracking_mode, TrackingMode};
