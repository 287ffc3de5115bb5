//! GitLab webhook and REST payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub path_with_namespace: String,
    pub web_url: String,
    pub git_http_url: String,
    pub git_ssh_url: String,
    pub http_url_to_repo: String,
    pub ssh_url_to_repo: String,
    pub avatar_url: Option<String>,
    pub default_branch: String,
    pub visibility_level: Option<u8>,
    pub visibility: Option<String>,
    pub archived: bool,
    pub merge_requests_enabled: Option<bool>,
    pub permissions: Option<ProjectPermissions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessLevel {
    pub access_level: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectPermissions {
    pub project_access: Option<AccessLevel>,
    pub group_access: Option<AccessLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookUser {
    pub id: u64,
    pub name: String,
    pub username: String,
    pub email: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookCommit {
    pub id: String,
    pub message: String,
    pub title: String,
    pub timestamp: String,
    pub url: String,
    pub author: CommitAuthor,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushHook {
    pub object_kind: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    pub checkout_sha: Option<String>,
    pub user_username: String,
    pub user_name: String,
    pub user_email: String,
    pub user_avatar: String,
    pub project: Project,
    pub commits: Vec<HookCommit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Label {
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LastCommit {
    pub id: String,
    pub message: String,
    pub timestamp: String,
    pub url: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestAttributes {
    pub iid: u64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub action: String,
    pub oldrev: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub source_project_id: u64,
    pub target_project_id: u64,
    pub last_commit: LastCommit,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Change<T> {
    pub previous: Option<T>,
    pub current: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestChanges {
    pub title: Option<Change<String>>,
    pub description: Option<Change<String>>,
    pub labels: Option<Change<Vec<Label>>>,
    pub assignees: Option<Change<Vec<HookUser>>>,
    pub milestone_id: Option<Change<u64>>,
    pub reviewers: Option<Change<Vec<HookUser>>>,
    pub draft: Option<Change<bool>>,
    pub discussion_locked: Option<Change<bool>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestHook {
    pub object_kind: String,
    pub user: HookUser,
    pub project: Project,
    pub object_attributes: MergeRequestAttributes,
    pub labels: Vec<Label>,
    pub changes: MergeRequestChanges,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseCommit {
    pub id: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseHook {
    pub action: String,
    pub name: String,
    pub tag: String,
    pub description: String,
    pub url: String,
    pub released_at: String,
    pub upcoming_release: bool,
    pub project: Project,
    pub commit: ReleaseCommit,
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiUser {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Group {
    pub full_path: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectHook {
    pub id: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHook<'a> {
    pub url: &'a str,
    pub token: &'a str,
    pub push_events: bool,
    pub tag_push_events: bool,
    pub merge_requests_events: bool,
    pub releases_events: bool,
    pub deployment_events: bool,
    pub enable_ssl_verification: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStatus<'a> {
    pub state: &'a str,
    pub target_url: &'a str,
    pub description: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub name: String,
    pub commit: BranchCommit,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BranchCommit {
    pub id: String,
    pub web_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestDiff {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub created_at: i64,
}
