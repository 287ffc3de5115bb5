//! Canonical pipeline trigger produced by webhook normalization.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical event kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Push,
    Tag,
    Pull,
    PullClosed,
    PullMetadata,
    Release,
    Deploy,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::Tag => "tag",
            EventKind::Pull => "pull",
            EventKind::PullClosed => "pull_closed",
            EventKind::PullMetadata => "pull_metadata",
            EventKind::Release => "release",
            EventKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a `pull_metadata` event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReason {
    LabelAdded,
    LabelCleared,
    LabelUpdated,
    Assigned,
    Unassigned,
    Milestoned,
    Demilestoned,
    TitleEdited,
    DescriptionEdited,
    ReviewRequested,
    Approved,
    Unapproved,
    Locked,
    Unlocked,
    ReadyForReview,
    ConvertedToDraft,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::LabelAdded => "label_added",
            EventReason::LabelCleared => "label_cleared",
            EventReason::LabelUpdated => "label_updated",
            EventReason::Assigned => "assigned",
            EventReason::Unassigned => "unassigned",
            EventReason::Milestoned => "milestoned",
            EventReason::Demilestoned => "demilestoned",
            EventReason::TitleEdited => "title_edited",
            EventReason::DescriptionEdited => "description_edited",
            EventReason::ReviewRequested => "review_requested",
            EventReason::Approved => "approved",
            EventReason::Unapproved => "unapproved",
            EventReason::Locked => "locked",
            EventReason::Unlocked => "unlocked",
            EventReason::ReadyForReview => "ready_for_review",
            EventReason::ConvertedToDraft => "converted_to_draft",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Changed file paths of a trigger.
///
/// Empty strings are dropped and each path is kept once, in first-seen order.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ChangedFiles {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl ChangedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path unless it is empty or already present.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !path.is_empty() && self.seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.paths
    }
}

impl PartialEq for ChangedFiles {
    fn eq(&self, other: &Self) -> bool {
        self.paths == other.paths
    }
}

impl Eq for ChangedFiles {}

impl fmt::Debug for ChangedFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.paths).finish()
    }
}

impl<S: Into<String>> Extend<S> for ChangedFiles {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for path in iter {
            self.push(path);
        }
    }
}

impl<S: Into<String>> FromIterator<S> for ChangedFiles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut files = ChangedFiles::new();
        files.extend(iter);
        files
    }
}

impl From<Vec<String>> for ChangedFiles {
    fn from(paths: Vec<String>) -> Self {
        paths.into_iter().collect()
    }
}

impl From<ChangedFiles> for Vec<String> {
    fn from(files: ChangedFiles) -> Self {
        files.paths
    }
}

/// Pull/merge request attached to a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub index: u64,
    pub title: String,
    pub labels: BTreeSet<String>,
    pub from_fork: bool,
}

/// Release attached to a `release` trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    pub tag: String,
    pub title: String,
    pub prerelease: bool,
}

/// Deployment attached to a `deploy` trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployment {
    pub environment: String,
    pub task: String,
}

/// Canonical pipeline trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub event: EventKind,
    pub event_reason: Vec<EventReason>,
    pub commit: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub branch: String,
    /// `source:target` for pull events
    pub refspec: String,
    pub title: String,
    pub message: String,
    pub author: String,
    pub email: String,
    pub avatar: String,
    pub sender: String,
    pub forge_url: String,
    /// Unix seconds
    pub timestamp: i64,
    pub changed_files: ChangedFiles,
    pub pull_request: Option<PullRequest>,
    pub release: Option<Release>,
    pub deploy: Option<Deployment>,
    pub from_fork: bool,
}

impl Pipeline {
    /// Pull request index, if this trigger carries one.
    pub fn pull_index(&self) -> Option<u64> {
        self.pull_request.as_ref().map(|pr| pr.index)
    }
}

/// Commit status pushed back to the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Running,
    Success,
    Failure,
    Killed,
    Error,
    Skipped,
}

impl StatusState {
    pub fn description(&self) -> &'static str {
        match self {
            StatusState::Pending => "Pipeline is pending",
            StatusState::Running => "Pipeline is running",
            StatusState::Success => "Pipeline was successful",
            StatusState::Failure => "Pipeline failed",
            StatusState::Killed => "Pipeline was canceled",
            StatusState::Error => "Pipeline errored",
            StatusState::Skipped => "Pipeline was skipped",
        }
    }
}

/// A status update for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: StatusState,
    /// Link back to the pipeline page
    pub target_url: String,
    /// Status context, e.g. `ci/forgeline/push`
    pub context: String,
}

impl CommitStatus {
    pub fn new(state: StatusState, target_url: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            state,
            target_url: target_url.into(),
            context: context.into(),
        }
    }
}
