//! GitLab webhook normalization.

use forgeline_core::hook::{is_tag_ref, is_zero_sha, label_reason, short_ref, PreviousLabels};
use forgeline_core::{
    ChangedFiles, EventKind, EventReason, ForgeResult, HookOutcome, HookRequest, Permission,
    Pipeline, PullRequest, Release, Repo, Visibility,
};
use tracing::debug;

use super::types;
use crate::common::unix_timestamp;

pub const EVENT_HEADER: &str = "X-Gitlab-Event";

const EVENT_PUSH: &str = "Push Hook";
const EVENT_TAG: &str = "Tag Push Hook";
const EVENT_MERGE: &str = "Merge Request Hook";
const EVENT_RELEASE: &str = "Release Hook";

// GitLab access levels
const LEVEL_GUEST: u32 = 10;
const LEVEL_DEVELOPER: u32 = 30;
const LEVEL_MAINTAINER: u32 = 40;

/// Normalize a GitLab webhook.
pub fn parse_hook(req: &HookRequest) -> ForgeResult<HookOutcome> {
    let event = req.header(EVENT_HEADER).unwrap_or_default();
    match event {
        EVENT_PUSH | EVENT_TAG => Ok(convert_push(serde_json::from_slice(&req.body)?)),
        EVENT_MERGE => Ok(convert_merge_request(serde_json::from_slice(&req.body)?)),
        EVENT_RELEASE => Ok(convert_release(serde_json::from_slice(&req.body)?)),
        other => {
            debug!(event = other, "unsupported gitlab event");
            Ok(HookOutcome::ignored(other, "unsupported event type"))
        }
    }
}

fn visibility(project: &types::Project) -> Visibility {
    match (project.visibility.as_deref(), project.visibility_level) {
        (Some("private"), _) | (None, Some(0)) => Visibility::Private,
        (Some("internal"), _) | (None, Some(10)) => Visibility::Internal,
        _ => Visibility::Public,
    }
}

fn permission(project: &types::Project) -> Option<Permission> {
    let perms = project.permissions.as_ref()?;
    let level = [&perms.project_access, &perms.group_access]
        .into_iter()
        .flatten()
        .map(|a| a.access_level)
        .max()
        .unwrap_or(0);
    Some(Permission::new(
        level >= LEVEL_GUEST,
        level >= LEVEL_DEVELOPER,
        level >= LEVEL_MAINTAINER,
    ))
}

pub(crate) fn convert_repo(project: &types::Project) -> Repo {
    let (owner, name) = Repo::split_full_name(&project.path_with_namespace);
    let pick = |a: &str, b: &str| if a.is_empty() { b.to_string() } else { a.to_string() };

    Repo {
        forge_remote_id: project.id.to_string(),
        name: if name.is_empty() { project.path.clone() } else { name },
        owner,
        full_name: project.path_with_namespace.clone(),
        avatar: project.avatar_url.clone().unwrap_or_default(),
        forge_url: project.web_url.clone(),
        clone: pick(&project.git_http_url, &project.http_url_to_repo),
        clone_ssh: pick(&project.git_ssh_url, &project.ssh_url_to_repo),
        default_branch: project.default_branch.clone(),
        visibility: visibility(project),
        perm: permission(project),
        pr_enabled: project.merge_requests_enabled.unwrap_or(true),
        ..Default::default()
    }
}

fn convert_push(hook: types::PushHook) -> HookOutcome {
    if is_zero_sha(&hook.after) {
        debug!(git_ref = %hook.git_ref, "ignoring deleted ref");
        return HookOutcome::Suppressed;
    }

    let repo = convert_repo(&hook.project);
    let commit = hook
        .checkout_sha
        .clone()
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| hook.after.clone());
    let head = hook
        .commits
        .iter()
        .find(|c| c.id == commit)
        .or_else(|| hook.commits.last())
        .cloned()
        .unwrap_or_default();

    let mut pipeline = Pipeline {
        event: EventKind::Push,
        branch: short_ref(&hook.git_ref).to_string(),
        git_ref: hook.git_ref.clone(),
        commit,
        title: if head.title.is_empty() {
            head.message.lines().next().unwrap_or_default().to_string()
        } else {
            head.title.clone()
        },
        message: head.message.clone(),
        timestamp: unix_timestamp(&head.timestamp),
        forge_url: head.url.clone(),
        author: hook.user_username.clone(),
        email: if hook.user_email.is_empty() {
            head.author.email.clone()
        } else {
            hook.user_email.clone()
        },
        avatar: hook.user_avatar.clone(),
        sender: hook.user_username.clone(),
        changed_files: hook
            .commits
            .iter()
            .flat_map(|c| c.added.iter().chain(&c.modified).chain(&c.removed))
            .cloned()
            .collect(),
        ..Default::default()
    };

    if is_tag_ref(&pipeline.git_ref) {
        pipeline.event = EventKind::Tag;
        pipeline.changed_files = ChangedFiles::new();
    }

    HookOutcome::matched(repo, pipeline)
}

/// Reasons for an `update` without new commits, derived from `changes`.
fn metadata_reasons(hook: &types::MergeRequestHook) -> Vec<EventReason> {
    let changes = &hook.changes;
    let mut reasons = Vec::new();

    if changes.title.is_some() {
        reasons.push(EventReason::TitleEdited);
    }
    if changes.description.is_some() {
        reasons.push(EventReason::DescriptionEdited);
    }
    if let Some(labels) = &changes.labels {
        let previous = match &labels.previous {
            Some(prev) if prev.is_empty() => PreviousLabels::Empty,
            Some(_) => PreviousLabels::Present,
            None => PreviousLabels::Unknown,
        };
        let current = labels.current.as_ref().map_or(0, Vec::len);
        reasons.push(label_reason(previous, current));
    }
    if let Some(assignees) = &changes.assignees {
        if assignees.current.as_ref().is_some_and(|a| !a.is_empty()) {
            reasons.push(EventReason::Assigned);
        } else {
            reasons.push(EventReason::Unassigned);
        }
    }
    if let Some(milestone) = &changes.milestone_id {
        if milestone.current.is_some() {
            reasons.push(EventReason::Milestoned);
        } else {
            reasons.push(EventReason::Demilestoned);
        }
    }
    if let Some(reviewers) = &changes.reviewers {
        if reviewers.current.as_ref().is_some_and(|r| !r.is_empty()) {
            reasons.push(EventReason::ReviewRequested);
        }
    }
    if let Some(draft) = &changes.draft {
        match draft.current {
            Some(true) => reasons.push(EventReason::ConvertedToDraft),
            Some(false) => reasons.push(EventReason::ReadyForReview),
            None => {}
        }
    }
    if let Some(locked) = &changes.discussion_locked {
        match locked.current {
            Some(true) => reasons.push(EventReason::Locked),
            Some(false) => reasons.push(EventReason::Unlocked),
            None => {}
        }
    }

    reasons
}

fn convert_merge_request(hook: types::MergeRequestHook) -> HookOutcome {
    let attrs = &hook.object_attributes;
    let event_name = format!("merge_request:{}", attrs.action);
    let has_new_commits = attrs.oldrev.as_deref().is_some_and(|rev| !rev.is_empty());

    let (event, reasons) = match attrs.action.as_str() {
        "open" | "reopen" => (EventKind::Pull, Vec::new()),
        "update" if has_new_commits => (EventKind::Pull, Vec::new()),
        "update" => {
            let reasons = metadata_reasons(&hook);
            if reasons.is_empty() {
                return HookOutcome::ignored(event_name, "update changed nothing tracked");
            }
            (EventKind::PullMetadata, reasons)
        }
        "close" | "merge" => (EventKind::PullClosed, Vec::new()),
        "approved" => (EventKind::PullMetadata, vec![EventReason::Approved]),
        "unapproved" => (EventKind::PullMetadata, vec![EventReason::Unapproved]),
        _ => return HookOutcome::ignored(event_name, "unsupported merge request action"),
    };

    let repo = convert_repo(&hook.project);
    let from_fork = attrs.source_project_id != attrs.target_project_id;
    let labels = hook.labels.iter().map(|l| l.title.clone()).collect();
    let commit = &attrs.last_commit;

    let pipeline = Pipeline {
        event,
        event_reason: reasons,
        commit: commit.id.clone(),
        git_ref: format!("refs/merge-requests/{}/head", attrs.iid),
        branch: attrs.target_branch.clone(),
        refspec: format!("{}:{}", attrs.source_branch, attrs.target_branch),
        title: attrs.title.clone(),
        message: if commit.message.is_empty() {
            attrs.title.clone()
        } else {
            commit.message.clone()
        },
        author: hook.user.username.clone(),
        email: if hook.user.email.is_empty() {
            commit.author.email.clone()
        } else {
            hook.user.email.clone()
        },
        avatar: hook.user.avatar_url.clone(),
        sender: hook.user.username.clone(),
        forge_url: attrs.url.clone(),
        timestamp: unix_timestamp(&commit.timestamp),
        pull_request: Some(PullRequest {
            index: attrs.iid,
            title: attrs.title.clone(),
            labels,
            from_fork,
        }),
        from_fork,
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}

fn convert_release(hook: types::ReleaseHook) -> HookOutcome {
    if hook.action != "create" {
        return HookOutcome::ignored(
            format!("release:{}", hook.action),
            "only created releases trigger pipelines",
        );
    }

    let repo = convert_repo(&hook.project);
    let name = if hook.name.is_empty() {
        hook.tag.clone()
    } else {
        hook.name.clone()
    };

    let pipeline = Pipeline {
        event: EventKind::Release,
        commit: hook.commit.id.clone(),
        git_ref: format!("refs/tags/{}", hook.tag),
        branch: hook.tag.clone(),
        title: name.clone(),
        message: format!("created release {name}"),
        forge_url: hook.url.clone(),
        author: hook.commit.author.name.clone(),
        email: hook.commit.author.email.clone(),
        timestamp: unix_timestamp(&hook.released_at),
        release: Some(Release {
            tag: hook.tag.clone(),
            title: name,
            prerelease: hook.upcoming_release,
        }),
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}
