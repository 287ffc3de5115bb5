//! Forge adapters for Forgeline.
//!
//! One module per provider. Each splits into payload types, a pure webhook
//! normalizer and a [`Forge`] implementation that talks REST through an
//! [`ApiTransport`]. [`build_forge`] resolves the adapter for a
//! [`ForgeKind`] once, at configuration time.

pub mod bitbucket;
mod common;
pub mod gitea;
pub mod github;
pub mod gitlab;

use std::sync::Arc;

use forgeline_core::transport::ApiTransport;
use forgeline_core::{Forge, ForgeError, ForgeKind, ForgeResult};
use serde::{Deserialize, Serialize};

pub use bitbucket::Bitbucket;
pub use gitea::Gitea;
pub use github::Github;
pub use gitlab::Gitlab;

/// Connection and OAuth settings for one forge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeOptions {
    /// Web URL, e.g. `https://github.com`. Empty means the provider's public instance.
    pub url: String,
    /// REST API base URL; derived from `url` when empty.
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// OAuth callback on the CI server.
    pub redirect_url: String,
    /// Build pull requests from the merge ref instead of the head ref (GitHub).
    pub merge_ref: bool,
    pub skip_verify: bool,
}

impl ForgeOptions {
    /// Create options for the forge at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_oauth(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.client_secret = secret.into();
        self
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = redirect_url.into();
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_merge_ref(mut self, merge_ref: bool) -> Self {
        self.merge_ref = merge_ref;
        self
    }

    /// Read options from environment variables
    ///
    /// Reads:
    /// - FORGELINE_FORGE_URL (optional)
    /// - FORGELINE_FORGE_API_URL (optional)
    /// - FORGELINE_FORGE_CLIENT / FORGELINE_FORGE_SECRET (optional)
    /// - FORGELINE_REDIRECT_URL (optional)
    /// - FORGELINE_MERGE_REF (optional, default: "false")
    /// - FORGELINE_SKIP_VERIFY (optional, default: "false")
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        Self {
            url: std::env::var("FORGELINE_FORGE_URL").unwrap_or_default(),
            api_url: std::env::var("FORGELINE_FORGE_API_URL").unwrap_or_default(),
            client_id: std::env::var("FORGELINE_FORGE_CLIENT").unwrap_or_default(),
            client_secret: std::env::var("FORGELINE_FORGE_SECRET").unwrap_or_default(),
            redirect_url: std::env::var("FORGELINE_REDIRECT_URL").unwrap_or_default(),
            merge_ref: flag("FORGELINE_MERGE_REF"),
            skip_verify: flag("FORGELINE_SKIP_VERIFY"),
        }
    }

    /// `url` without a trailing slash, or `default` when unset.
    pub(crate) fn web_url(&self, default: &str) -> String {
        let url = if self.url.is_empty() {
            default
        } else {
            self.url.as_str()
        };
        url.trim_end_matches('/').to_string()
    }

    /// `api_url` without a trailing slash, or `derived` when unset.
    pub(crate) fn api_base(&self, derived: String) -> String {
        if self.api_url.is_empty() {
            derived
        } else {
            self.api_url.trim_end_matches('/').to_string()
        }
    }
}

/// Construct the adapter for `kind`.
pub fn build_forge(
    kind: ForgeKind,
    options: ForgeOptions,
    transport: Arc<dyn ApiTransport>,
) -> ForgeResult<Arc<dyn Forge>> {
    let forge: Arc<dyn Forge> = match kind {
        ForgeKind::Github => Arc::new(Github::new(options, transport)),
        ForgeKind::Gitlab => Arc::new(Gitlab::new(options, transport)),
        ForgeKind::Gitea | ForgeKind::Forgejo => {
            if options.url.is_empty() {
                return Err(ForgeError::Unsupported(format!(
                    "{kind} needs an explicit forge URL"
                )));
            }
            Arc::new(Gitea::new(kind, options, transport))
        }
        ForgeKind::Bitbucket => Arc::new(Bitbucket::new(options, transport)),
    };
    Ok(forge)
}
