//! The forge adapter contract.
//!
//! One [`Forge`] implementation exists per provider. Webhook parsing is a
//! pure function of the request ([`Forge::parse_hook`]); the provided
//! [`Forge::hook`] wraps it with the pull-request changed-files backfill.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    Commit, CommitStatus, EventKind, FileBlob, ForgeError, ForgeResult, NetrcCredential,
    Pipeline, Repo, Team, User,
};

// ---------------------------------------------------------------------------
// ForgeKind
// ---------------------------------------------------------------------------

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    Github,
    Gitlab,
    Gitea,
    Forgejo,
    Bitbucket,
}

impl ForgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForgeKind::Github => "github",
            ForgeKind::Gitlab => "gitlab",
            ForgeKind::Gitea => "gitea",
            ForgeKind::Forgejo => "forgejo",
            ForgeKind::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForgeKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(ForgeKind::Github),
            "gitlab" => Ok(ForgeKind::Gitlab),
            "gitea" => Ok(ForgeKind::Gitea),
            "forgejo" => Ok(ForgeKind::Forgejo),
            "bitbucket" => Ok(ForgeKind::Bitbucket),
            other => Err(ForgeError::Unsupported(format!("forge type: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Query parameters of an OAuth2 callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFlow {
    /// Send the browser to this authorization URL.
    Redirect(String),
    /// Code exchanged; the user is authenticated.
    Authenticated(User),
}

/// How to look up a single repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoLookup {
    RemoteId(String),
    Name { owner: String, name: String },
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// Raw inbound webhook. Header names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookRequest {
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HookRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A webhook that was recognized but deliberately not turned into a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredEvent {
    /// Raw wire event type (and action, when relevant)
    pub event: String,
    pub reason: String,
}

impl fmt::Display for IgnoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ignored event '{}': {}", self.event, self.reason)
    }
}

/// Result of webhook normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HookOutcome {
    /// A trigger was produced.
    Matched { repo: Repo, pipeline: Pipeline },
    /// Recognized but skipped; answer the forge with success.
    Ignored(IgnoredEvent),
    /// Branch or tag deletion; nothing to do and nothing to report.
    Suppressed,
}

impl HookOutcome {
    /// Build a match, deriving the repo's full name if the payload omitted it.
    pub fn matched(mut repo: Repo, pipeline: Pipeline) -> Self {
        repo.ensure_full_name();
        HookOutcome::Matched { repo, pipeline }
    }

    pub fn ignored(event: impl Into<String>, reason: impl Into<String>) -> Self {
        HookOutcome::Ignored(IgnoredEvent {
            event: event.into(),
            reason: reason.into(),
        })
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, HookOutcome::Matched { .. })
    }

    pub fn into_matched(self) -> Option<(Repo, Pipeline)> {
        match self {
            HookOutcome::Matched { repo, pipeline } => Some((repo, pipeline)),
            _ => None,
        }
    }
}

/// Finds the account whose token is used for the pull-request backfill.
#[async_trait]
pub trait RepoOwnerLookup: Send + Sync {
    async fn owner_of(&self, repo: &Repo) -> ForgeResult<Option<User>>;
}

/// Always answers with the same account (or none).
#[derive(Debug, Clone, Default)]
pub struct FixedOwner(pub Option<User>);

#[async_trait]
impl RepoOwnerLookup for FixedOwner {
    async fn owner_of(&self, _repo: &Repo) -> ForgeResult<Option<User>> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Forge
// ---------------------------------------------------------------------------

/// Capability interface implemented once per provider.
#[async_trait]
pub trait Forge: Send + Sync {
    fn kind(&self) -> ForgeKind;

    /// Base web URL of the forge.
    fn url(&self) -> &str;

    /// OAuth2 login: redirect when no code is present, otherwise exchange it.
    async fn login(&self, req: &LoginRequest) -> ForgeResult<LoginFlow>;

    /// Validate a token and return the login it belongs to.
    async fn auth(&self, token: &str) -> ForgeResult<String>;

    async fn teams(&self, user: &User) -> ForgeResult<Vec<Team>>;

    async fn repo(&self, user: &User, lookup: &RepoLookup) -> ForgeResult<Repo>;

    async fn repos(&self, user: &User) -> ForgeResult<Vec<Repo>>;

    /// Raw bytes of `path` at the pipeline commit. `ForgeError::NotFound` on miss.
    async fn file(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<u8>>;

    /// Every blob below `path`, recursively. One failed file fails the listing.
    async fn dir(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<FileBlob>>;

    async fn status(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        status: &CommitStatus,
    ) -> ForgeResult<()>;

    /// Clone credentials; empty login and password when `user` is `None`.
    fn netrc(&self, user: Option<&User>, repo: &Repo) -> ForgeResult<NetrcCredential>;

    /// Register the webhook, replacing any hook already pointing at the same host.
    async fn activate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()>;

    /// Remove every hook whose URL host matches `link`'s host.
    async fn deactivate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()>;

    async fn branches(&self, user: &User, repo: &Repo) -> ForgeResult<Vec<String>>;

    async fn branch_head(&self, user: &User, repo: &Repo, branch: &str) -> ForgeResult<Commit>;

    /// Changed files of a pull request, across all pages.
    async fn pull_request_files(
        &self,
        user: &User,
        repo: &Repo,
        index: u64,
    ) -> ForgeResult<Vec<String>>;

    /// Normalize a webhook without any I/O.
    fn parse_hook(&self, req: &HookRequest) -> ForgeResult<HookOutcome>;

    /// Normalize a webhook, then backfill changed files of a `pull` trigger
    /// whose payload carried none.
    async fn hook(
        &self,
        req: &HookRequest,
        owners: &dyn RepoOwnerLookup,
    ) -> ForgeResult<HookOutcome> {
        let mut outcome = self.parse_hook(req)?;

        if let HookOutcome::Matched { repo, pipeline } = &mut outcome {
            if pipeline.event == EventKind::Pull && pipeline.changed_files.is_empty() {
                if let Some(index) = pipeline.pull_index() {
                    if let Some(user) = owners.owner_of(repo).await? {
                        let files = self.pull_request_files(&user, repo, index).await?;
                        debug!(
                            forge = %self.kind(),
                            repo = %repo.full_name,
                            index,
                            files = files.len(),
                            "backfilled changed files"
                        );
                        pipeline.changed_files.extend(files);
                    }
                }
            }
        }

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Hook (de)activation helpers
// ---------------------------------------------------------------------------

/// Host of a URL, or an empty string if it does not parse.
pub fn url_host(link: &str) -> String {
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Select the hooks registered for the same host as `link`.
///
/// Matching on host tolerates token query strings that change between activations.
pub fn matching_hooks<'a, T, F>(hooks: &'a [T], link: &str, hook_url: F) -> Vec<&'a T>
where
    F: Fn(&T) -> &str,
{
    let host = url_host(link);
    if host.is_empty() {
        return Vec::new();
    }
    hooks
        .iter()
        .filter(|hook| url_host(hook_url(hook)) == host)
        .collect()
}
