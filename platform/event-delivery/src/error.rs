//! Error taxonomy shared by every component of the delivery layer.
//!
//! Setup and validation failures are returned to the caller. Failures that
//! happen while a message is being delivered are turned into ack/nak signals
//! and never show up here.

/// Boxed cause carried by [`EventError::InternalServerError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by the event delivery layer
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The caller supplied invalid input. Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The broker failed (connect, publish exhaustion, subscribe, stream admin).
    #[error("internal server error: {message}")]
    InternalServerError {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The caller cancelled a publish while it was waiting to retry.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl EventError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Internal error without an underlying cause
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalServerError {
            message: message.into(),
            source: None,
        }
    }

    /// Internal error wrapping the broker-side cause
    pub fn internal_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::InternalServerError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Stable machine-readable code, as used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InternalServerError { .. } => "INTERNAL_SERVER_ERROR",
            Self::Cancelled(_) => "CANCELLED",
        }
    }

    /// HTTP status a transport adapter should map this error to
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::InternalServerError { .. } => 500,
            // Client closed request
            Self::Cancelled(_) => 499,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InternalServerError { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result type for event delivery operations
pub type EventResult<T> = Result<T, EventError>;
