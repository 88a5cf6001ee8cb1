mod registry;

pub use registry::{StatusCallback, StatusRegistry, Subscription};
