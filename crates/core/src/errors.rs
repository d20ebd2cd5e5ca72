use thiserror::Error;

/// Typed failure surface of a capability adapter. Nothing else may escape
/// an adapter call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("capability call timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("capability rejected input: {0}")]
    InvalidInput(String),
}

impl AdapterError {
    /// Only transport-shaped failures are worth retrying; a rejected input
    /// will be rejected again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("invalid turn input: {0}")]
    InvalidInput(String),
}

impl TurnError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "Please send a message with some text so I can help.",
        }
    }
}
