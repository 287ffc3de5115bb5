//! Pipeline config discovery.
//!
//! [`ConfigFetcher`] walks the discovery chain against a [`Forge`]:
//!
//! - explicit path not ending in `/`: the file, else the directory (`.yml` only)
//! - explicit path ending in `/`: the directory (`.yml` only)
//! - no path: `.woodpecker/` directory, `.woodpecker.yml`, `.drone.yml`
//!
//! Each attempt walks the whole chain under its own timeout. Only a
//! deadline-exceeded failure is retried, up to [`DEFAULT_ATTEMPTS`] attempts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::domain::{
    filter_pipeline_files, ConfigError, FileBlob, ForgeError, Pipeline, Repo, User,
};
use crate::forge::Forge;

/// Per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Total attempts, counting the first one.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Conventional locations tried in order when no path is declared.
const FALLBACK_DIR: &str = ".woodpecker";
const FALLBACK_FILES: [&str; 2] = [".woodpecker.yml", ".drone.yml"];

/// Resolves the config files of one pipeline trigger.
pub struct ConfigFetcher {
    forge: Arc<dyn Forge>,
    user: User,
    repo: Repo,
    pipeline: Pipeline,
    config_path: String,
    timeout: Duration,
    attempts: u32,
}

impl ConfigFetcher {
    /// Create a new fetcher using the repo's declared config path.
    pub fn new(forge: Arc<dyn Forge>, user: User, repo: Repo, pipeline: Pipeline) -> Self {
        let config_path = repo.config_path.trim().to_string();
        Self {
            forge,
            user,
            repo,
            pipeline,
            config_path,
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Override the declared config path.
    pub fn with_config_path(mut self, path: impl AsRef<str>) -> Self {
        self.config_path = path.as_ref().trim().to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run the discovery chain with the timeout/retry policy.
    ///
    /// Dropping the returned future cancels the in-flight attempt.
    #[instrument(skip(self), fields(repo = %self.repo.full_name, path = %self.config_path))]
    pub async fn fetch(&self) -> Result<Vec<FileBlob>, ConfigError> {
        let mut last_err = ConfigError::DeadlineExceeded;

        for attempt in 1..=self.attempts {
            let result = match tokio::time::timeout(self.timeout, self.fetch_once()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ConfigError::DeadlineExceeded),
            };

            match result {
                Ok(files) => {
                    info!(attempt, files = files.len(), "config resolved");
                    return Ok(files);
                }
                Err(err) if err.is_deadline_exceeded() => {
                    warn!(attempt, max_attempts = self.attempts, error = %err, "config fetch timed out");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    /// One walk of the discovery chain.
    async fn fetch_once(&self) -> Result<Vec<FileBlob>, ConfigError> {
        if self.config_path.is_empty() {
            return self.fetch_fallback().await;
        }

        let path = self.config_path.as_str();
        if !path.ends_with('/') {
            match self.file(path).await {
                Ok(Some(blob)) => return Ok(vec![blob]),
                Ok(None) => {}
                Err(err) if err.is_deadline_exceeded() => {
                    return Err(ConfigError::NotFound {
                        path: path.to_string(),
                        source: Some(err),
                    })
                }
                Err(err) => debug!(error = %err, "config path is not a file"),
            }
        }

        match self.dir(path.trim_end_matches('/')).await {
            Ok(files) if !files.is_empty() => Ok(files),
            Ok(_) => Err(ConfigError::NotFound {
                path: path.to_string(),
                source: None,
            }),
            Err(err) => Err(ConfigError::NotFound {
                path: path.to_string(),
                source: Some(err),
            }),
        }
    }

    async fn fetch_fallback(&self) -> Result<Vec<FileBlob>, ConfigError> {
        let mut last_err: Option<ForgeError> = None;

        match self.dir(FALLBACK_DIR).await {
            Ok(files) if !files.is_empty() => return Ok(files),
            Ok(_) => {}
            Err(err) => last_err = Some(err),
        }

        for name in FALLBACK_FILES {
            match self.file(name).await {
                Ok(Some(blob)) => return Ok(vec![blob]),
                Ok(None) => {}
                Err(err) => last_err = Some(err),
            }
        }

        if last_err
            .as_ref()
            .is_some_and(ForgeError::is_deadline_exceeded)
        {
            return Err(ConfigError::DeadlineExceeded);
        }
        Err(ConfigError::FallbackNotFound { source: last_err })
    }

    /// A non-empty file, `None` on miss or empty content.
    async fn file(&self, path: &str) -> Result<Option<FileBlob>, ForgeError> {
        match self
            .forge
            .file(&self.user, &self.repo, &self.pipeline, path)
            .await
        {
            Ok(data) if !data.is_empty() => Ok(Some(FileBlob::new(path, data))),
            Ok(_) => Ok(None),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `.yml` files below `path`.
    async fn dir(&self, path: &str) -> Result<Vec<FileBlob>, ForgeError> {
        let files = self
            .forge
            .dir(&self.user, &self.repo, &self.pipeline, path)
            .await?;
        Ok(filter_pipeline_files(files))
    }
}
