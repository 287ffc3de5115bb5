//! Gitea / Forgejo webhook and REST payloads. Both speak the same dialect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub avatar_url: String,
}

impl User {
    /// Older servers fill `username`, newer ones `login`.
    pub fn name(&self) -> &str {
        if self.login.is_empty() {
            &self.username
        } else {
            &self.login
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub admin: bool,
    pub push: bool,
    pub pull: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub id: u64,
    pub owner: User,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    pub ssh_url: String,
    pub default_branch: String,
    pub avatar_url: String,
    pub private: bool,
    pub internal: bool,
    pub archived: bool,
    pub has_pull_requests: Option<bool>,
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookCommit {
    pub id: String,
    pub message: String,
    pub url: String,
    pub timestamp: String,
    pub author: CommitAuthor,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushHook {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub compare_url: String,
    pub commits: Vec<HookCommit>,
    pub head_commit: Option<HookCommit>,
    pub repository: Repository,
    pub pusher: User,
    pub sender: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullBranch {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub repo_id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub html_url: String,
    pub user: User,
    pub labels: Vec<Label>,
    pub head: PullBranch,
    pub base: PullBranch,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChangeFrom {
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullChanges {
    pub title: Option<ChangeFrom>,
    pub body: Option<ChangeFrom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestHook {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub changes: Option<PullChanges>,
    pub repository: Repository,
    pub sender: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseBody {
    pub tag_name: String,
    pub target_commitish: String,
    pub name: String,
    pub html_url: String,
    pub prerelease: bool,
    pub author: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseHook {
    pub action: String,
    pub release: ReleaseBody,
    pub repository: Repository,
    pub sender: User,
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hook {
    pub id: u64,
    pub config: HookConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHookConfig<'a> {
    pub url: &'a str,
    pub content_type: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHook<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub active: bool,
    pub events: &'a [&'a str],
    pub config: NewHookConfig<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStatus<'a> {
    pub state: &'a str,
    pub target_url: &'a str,
    pub description: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BranchCommit {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub name: String,
    pub commit: BranchCommit,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChangedFile {
    pub filename: String,
    pub previous_filename: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}
