//! Error taxonomy for forge adapters and config resolution.

/// Errors produced by forge adapters.
///
/// Callers classify them with [`ForgeError::is_not_found`],
/// [`ForgeError::is_transient`] and [`ForgeError::is_deadline_exceeded`].
/// An ignored webhook is not an error; see [`crate::forge::HookOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForgeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure, 5xx or rate limit. Retryable by the caller.
    #[error("transient forge failure: {0}")]
    Transient(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("forge API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ForgeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ForgeError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForgeError::Transient(_) | ForgeError::DeadlineExceeded(_) | ForgeError::Transport(_)
        )
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ForgeError::DeadlineExceeded(_))
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        ForgeError::MalformedPayload(err.to_string())
    }
}

/// Result type for forge adapter operations.
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Errors produced by the config resolution engine.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicit config path matched neither a file nor a directory of `.yml` files.
    #[error("config '{path}' not found")]
    NotFound {
        path: String,
        #[source]
        source: Option<ForgeError>,
    },

    /// None of the conventional locations held a config.
    #[error("fallback did not find config")]
    FallbackNotFound {
        #[source]
        source: Option<ForgeError>,
    },

    #[error("config resolution deadline exceeded")]
    DeadlineExceeded,
}

impl ConfigError {
    /// True for a timed-out attempt, including a forge deadline error underneath.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            ConfigError::DeadlineExceeded => true,
            ConfigError::NotFound { source, .. } | ConfigError::FallbackNotFound { source } => {
                source.as_ref().is_some_and(ForgeError::is_deadline_exceeded)
            }
        }
    }
}
