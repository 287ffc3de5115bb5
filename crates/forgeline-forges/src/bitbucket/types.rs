//! Bitbucket Cloud webhook and REST payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloneLink {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Links {
    pub html: Option<Link>,
    pub avatar: Option<Link>,
    pub clone: Vec<CloneLink>,
}

impl Links {
    pub fn html(&self) -> String {
        self.html.as_ref().map(|l| l.href.clone()).unwrap_or_default()
    }

    pub fn avatar(&self) -> String {
        self.avatar.as_ref().map(|l| l.href.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Account {
    pub uuid: String,
    pub account_id: String,
    pub nickname: String,
    pub username: String,
    pub display_name: String,
    pub links: Links,
}

impl Account {
    pub fn login(&self) -> &str {
        if self.nickname.is_empty() {
            &self.username
        } else {
            &self.nickname
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MainBranch {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub uuid: String,
    pub name: String,
    pub full_name: String,
    pub is_private: bool,
    pub has_issues: bool,
    pub mainbranch: Option<MainBranch>,
    pub owner: Account,
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Author {
    pub raw: String,
    pub user: Option<Account>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Target {
    pub hash: String,
    pub message: String,
    pub date: String,
    pub author: Author,
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RefState {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub target: Target,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Change {
    pub new: Option<RefState>,
    pub old: Option<RefState>,
    pub created: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Push {
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushHook {
    pub actor: Account,
    pub repository: Repository,
    pub push: Push,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BranchName {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitHash {
    pub hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoName {
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub branch: BranchName,
    pub commit: CommitHash,
    pub repository: RepoName,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub state: String,
    pub author: Account,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub links: Links,
    pub updated_on: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestHook {
    pub actor: Account,
    pub repository: Repository,
    pub pullrequest: PullRequest,
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

/// Bitbucket's page envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub slug: String,
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SrcEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hook {
    pub uuid: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHook<'a> {
    pub description: &'a str,
    pub url: &'a str,
    pub active: bool,
    pub events: &'a [&'a str],
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStatus<'a> {
    pub state: &'a str,
    pub key: &'a str,
    pub name: &'a str,
    pub url: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BranchRef {
    pub name: String,
    pub target: Target,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiffPath {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiffStat {
    pub new: Option<DiffPath>,
    pub old: Option<DiffPath>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}
