mod canceler;
mod types;

pub use canceler::BookingCanceler;
pub use types::{
    Booking, CancelError, CancelOrigin, CancelReport, CancelSettings, DeletionOutcome,
    PaymentRelease,
};
