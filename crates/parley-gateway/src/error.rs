use thiserror::Error;

/// Failure of a single client request. The message is what the requesting
/// connection sees in its `error` event.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown user, channel, group or message
    #[error("{0}")]
    NotFound(String),

    /// Caller is not allowed to do this
    #[error("{0}")]
    Forbidden(String),

    /// Malformed or semantically disallowed request
    #[error("{0}")]
    InvalidOperation(String),

    /// Storage failure; details are logged, not sent
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::Internal(_) => "internal",
        }
    }
}

/// Reject blank required fields the way every handler does.
pub(crate) fn require(value: &str, event: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        Err(GatewayError::InvalidOperation(format!("Invalid {event} payload")))
    } else {
        Ok(())
    }
}
