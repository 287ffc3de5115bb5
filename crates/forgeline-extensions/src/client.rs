//! Signed HTTP client for extension endpoints.

use std::sync::Arc;
use std::time::Duration;

use forgeline_core::{ApiRequest, ApiTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::ExtensionError;
use crate::signing::KeyProvider;
use crate::Result;

/// Per-call timeout for extension requests.
pub const DEFAULT_EXTENSION_TIMEOUT: Duration = Duration::from_secs(10);

/// What an extension answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionReply<T> {
    /// `200`: the extension's value replaces ours.
    Replaced(T),
    /// `204`: keep what we already had.
    Unchanged,
}

/// POSTs signed JSON to extension endpoints.
#[derive(Clone)]
pub struct ExtensionClient {
    transport: Arc<dyn ApiTransport>,
    keys: Arc<KeyProvider>,
    timeout: Duration,
}

impl ExtensionClient {
    pub fn new(transport: Arc<dyn ApiTransport>, keys: Arc<KeyProvider>) -> Self {
        Self {
            transport,
            keys,
            timeout: DEFAULT_EXTENSION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sign and send `body` to `endpoint`.
    ///
    /// Signing happens before anything is sent; a signing failure means no
    /// request goes out. Any status other than 200 or 204 is an
    /// [`ExtensionError::Override`].
    #[instrument(skip(self, body))]
    pub async fn send<B, T>(&self, endpoint: &str, body: &B) -> Result<ExtensionReply<T>>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let signer = self.keys.signer().await?;
        let req = ApiRequest::post(endpoint)
            .with_header("Accept", "application/json")
            .with_json(body)?
            .with_timeout(self.timeout);
        let req = signer.sign_request(req)?;

        let resp = self.transport.send(req).await?;
        match resp.status {
            200 => {
                debug!("extension replaced the value");
                let value = serde_json::from_slice(&resp.body)?;
                Ok(ExtensionReply::Replaced(value))
            }
            204 => {
                debug!("extension kept the value");
                Ok(ExtensionReply::Unchanged)
            }
            status => {
                let message = resp.text();
                warn!(status, "extension rejected the request");
                Err(ExtensionError::Override { status, message })
            }
        }
    }
}
