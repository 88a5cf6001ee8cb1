use thiserror::Error;

/// Errors returned by a backing-store implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An update targeted a document that does not exist.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The realtime listener failed (permission revoked, connection lost).
    #[error("listener failed: {0}")]
    Listener(String),

    /// A backend-specific error (connection, serialization, etc.).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Errors returned by the payment backend client.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment request failed: {0}")]
    Transport(String),

    #[error("payment backend returned status {0}")]
    Status(u16),

    #[error("invalid payment backend response: {0}")]
    Decode(String),

    #[error("invalid payment backend url: {0}")]
    Url(String),
}
