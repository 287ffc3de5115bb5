//! Config services: local discovery plus an optional signed override.
//!
//! [`ForgeConfigService`] only walks the repository through [`ConfigFetcher`].
//! [`CombinedConfigService`] hands its result to an [`HttpConfigExtension`],
//! which has the final word:
//!
//! | extension reply | result |
//! |---|---|
//! | `204` | the local files, or the local error |
//! | `200` | the extension's list, even when empty |
//! | anything else | error, local files are discarded |
//!
//! A local deadline failure is returned as-is without asking the extension.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forgeline_core::config::{DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};
use forgeline_core::{ConfigFetcher, FileBlob, Forge, Pipeline, Repo, User};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::client::{ExtensionClient, ExtensionReply};
use crate::Result;

/// Resolves the config files for a pipeline trigger.
#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn fetch(
        &self,
        forge: Arc<dyn Forge>,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
    ) -> Result<Vec<FileBlob>>;
}

// ---------------------------------------------------------------------------
// Local discovery
// ---------------------------------------------------------------------------

/// Reads config from the repository itself.
#[derive(Debug, Clone)]
pub struct ForgeConfigService {
    timeout: Duration,
    attempts: u32,
}

impl Default for ForgeConfigService {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl ForgeConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[async_trait]
impl ConfigService for ForgeConfigService {
    async fn fetch(
        &self,
        forge: Arc<dyn Forge>,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
    ) -> Result<Vec<FileBlob>> {
        let files = ConfigFetcher::new(forge, user.clone(), repo.clone(), pipeline.clone())
            .with_timeout(self.timeout)
            .with_attempts(self.attempts)
            .fetch()
            .await?;
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// HTTP override
// ---------------------------------------------------------------------------

/// A config file on the wire; `data` is UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    pub data: String,
}

impl From<&FileBlob> for ConfigEntry {
    fn from(blob: &FileBlob) -> Self {
        Self {
            name: blob.name.clone(),
            data: blob.text(),
        }
    }
}

impl From<ConfigEntry> for FileBlob {
    fn from(entry: ConfigEntry) -> Self {
        FileBlob::new(entry.name, entry.data.into_bytes())
    }
}

#[derive(Debug, Serialize)]
struct ConfigRequest<'a> {
    repo: &'a Repo,
    pipeline: &'a Pipeline,
    configs: Vec<ConfigEntry>,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(default)]
    configs: Vec<ConfigEntry>,
}

/// Config extension reached over signed HTTP.
#[derive(Clone)]
pub struct HttpConfigExtension {
    client: ExtensionClient,
    endpoint: String,
}

impl HttpConfigExtension {
    pub fn new(client: ExtensionClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Offer `current` to the extension and return its verdict.
    pub async fn fetch(
        &self,
        repo: &Repo,
        pipeline: &Pipeline,
        current: &[FileBlob],
    ) -> Result<ExtensionReply<Vec<FileBlob>>> {
        let body = ConfigRequest {
            repo,
            pipeline,
            configs: current.iter().map(ConfigEntry::from).collect(),
        };

        let reply = self
            .client
            .send::<_, ConfigResponse>(&self.endpoint, &body)
            .await?;
        Ok(match reply {
            ExtensionReply::Replaced(resp) => {
                ExtensionReply::Replaced(resp.configs.into_iter().map(FileBlob::from).collect())
            }
            ExtensionReply::Unchanged => ExtensionReply::Unchanged,
        })
    }
}

// ---------------------------------------------------------------------------
// Combined
// ---------------------------------------------------------------------------

/// Local discovery followed by an authoritative HTTP override.
pub struct CombinedConfigService {
    local: ForgeConfigService,
    extension: HttpConfigExtension,
}

impl CombinedConfigService {
    pub fn new(local: ForgeConfigService, extension: HttpConfigExtension) -> Self {
        Self { local, extension }
    }
}

#[async_trait]
impl ConfigService for CombinedConfigService {
    #[instrument(skip_all, fields(repo = %repo.full_name, endpoint = %self.extension.endpoint()))]
    async fn fetch(
        &self,
        forge: Arc<dyn Forge>,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
    ) -> Result<Vec<FileBlob>> {
        let local = match self.local.fetch(forge, user, repo, pipeline).await {
            Err(err) if err.is_deadline_exceeded() => return Err(err),
            other => other,
        };

        let current: &[FileBlob] = match &local {
            Ok(files) => files.as_slice(),
            Err(err) => {
                debug!(error = %err, "local config failed, asking extension anyway");
                &[]
            }
        };

        match self.extension.fetch(repo, pipeline, current).await? {
            ExtensionReply::Replaced(files) => {
                info!(files = files.len(), "extension replaced config");
                Ok(files)
            }
            ExtensionReply::Unchanged => local,
        }
    }
}
