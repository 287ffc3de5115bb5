//! Error types for forgeline-extensions

use forgeline_core::{ConfigError, ForgeError};
use forgeline_state::StorageError;
use thiserror::Error;

/// Errors raised while resolving config, secrets or registries
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// Local config discovery failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The override endpoint answered with something other than 200/204
    #[error("extension returned {status}: {message}")]
    Override { status: u16, message: String },

    /// The override endpoint could not be reached
    #[error("extension request failed: {0}")]
    Transport(#[from] ForgeError),

    /// The outbound request could not be signed
    #[error("request signing failed: {0}")]
    Signing(String),

    /// Built-in store failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Request or response body could not be encoded or decoded
    #[error("extension payload error: {0}")]
    Serialization(String),

    /// Persisted or supplied key material is unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl ExtensionError {
    /// True when local discovery ran out of attempts on a deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            ExtensionError::Config(err) => err.is_deadline_exceeded(),
            ExtensionError::Transport(err) => err.is_deadline_exceeded(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ExtensionError {
    fn from(err: serde_json::Error) -> Self {
        ExtensionError::Serialization(err.to_string())
    }
}
