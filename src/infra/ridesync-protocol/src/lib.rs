mod document;
mod envelope;
mod error;
mod event;
mod status;

pub use document::*;
pub use envelope::*;
pub use error::*;
pub use event::*;
pub use status::*;
