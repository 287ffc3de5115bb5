//! Gitea / Forgejo webhook normalization.

use forgeline_core::hook::{is_tag_ref, is_zero_sha, short_ref};
use forgeline_core::{
    ChangedFiles, EventKind, EventReason, ForgeResult, HookOutcome, HookRequest, Permission,
    Pipeline, PullRequest, Release, Repo, Visibility,
};
use tracing::debug;

use super::types;
use crate::common::unix_timestamp;

pub const EVENT_HEADER: &str = "X-Gitea-Event";
pub const FORGEJO_EVENT_HEADER: &str = "X-Forgejo-Event";

const EVENT_PUSH: &str = "push";
const EVENT_CREATE: &str = "create";
const EVENT_PULL: &str = "pull_request";
const EVENT_REVIEW_APPROVED: &str = "pull_request_review_approved";
const EVENT_RELEASE: &str = "release";

/// Newer servers name metadata hooks individually; the payload is a pull request.
const PULL_EVENT_ALIASES: &[&str] = &[
    "pull_request_assign",
    "pull_request_label",
    "pull_request_milestone",
    "pull_request_sync",
    "pull_request_review_request",
];

/// Normalize a Gitea or Forgejo webhook.
pub fn parse_hook(req: &HookRequest) -> ForgeResult<HookOutcome> {
    let event = req
        .header(EVENT_HEADER)
        .or_else(|| req.header(FORGEJO_EVENT_HEADER))
        .unwrap_or_default();

    match event {
        EVENT_PUSH => Ok(convert_push(serde_json::from_slice(&req.body)?)),
        EVENT_CREATE => Ok(HookOutcome::ignored(
            event,
            "tag and branch creation arrives as a push",
        )),
        EVENT_PULL => Ok(convert_pull(serde_json::from_slice(&req.body)?)),
        alias if PULL_EVENT_ALIASES.contains(&alias) => {
            Ok(convert_pull(serde_json::from_slice(&req.body)?))
        }
        EVENT_REVIEW_APPROVED => Ok(convert_approval(serde_json::from_slice(&req.body)?)),
        EVENT_RELEASE => Ok(convert_release(serde_json::from_slice(&req.body)?)),
        other => {
            debug!(event = other, "unsupported gitea event");
            Ok(HookOutcome::ignored(other, "unsupported event type"))
        }
    }
}

/// Repair the malformed avatar links some server versions emit
/// (`http:///host/...`, `host//avatars/...`).
pub(crate) fn fix_malformed_avatar(avatar: &str) -> String {
    if let Some(index) = avatar.find("///") {
        return avatar[index + 1..].to_string();
    }
    if avatar.contains("//avatars/") {
        return avatar.replace("//avatars/", "/avatars/");
    }
    avatar.to_string()
}

/// Resolve a relative avatar link against the repository's web URL.
pub(crate) fn expand_avatar(repo_url: &str, avatar: &str) -> String {
    if avatar.is_empty() || url::Url::parse(avatar).is_ok() {
        return avatar.to_string();
    }
    url::Url::parse(repo_url)
        .and_then(|base| base.join(avatar))
        .map(String::from)
        .unwrap_or_else(|_| avatar.to_string())
}

fn avatar(repo_url: &str, raw: &str) -> String {
    expand_avatar(repo_url, &fix_malformed_avatar(raw))
}

pub(crate) fn convert_repo(from: &types::Repository) -> Repo {
    let visibility = if from.private {
        Visibility::Private
    } else if from.internal {
        Visibility::Internal
    } else {
        Visibility::Public
    };
    let owner = from.owner.name().to_string();
    let raw_avatar = if from.avatar_url.is_empty() {
        &from.owner.avatar_url
    } else {
        &from.avatar_url
    };

    let mut repo = Repo {
        forge_remote_id: from.id.to_string(),
        owner,
        name: from.name.clone(),
        full_name: from.full_name.clone(),
        avatar: avatar(&from.html_url, raw_avatar),
        forge_url: from.html_url.clone(),
        clone: from.clone_url.clone(),
        clone_ssh: from.ssh_url.clone(),
        default_branch: from.default_branch.clone(),
        visibility,
        perm: from
            .permissions
            .as_ref()
            .map(|p| Permission::new(p.pull, p.push, p.admin)),
        pr_enabled: from.has_pull_requests.unwrap_or(true),
        ..Default::default()
    };
    repo.ensure_full_name();
    repo
}

fn convert_push(hook: types::PushHook) -> HookOutcome {
    if is_zero_sha(&hook.after) {
        debug!(git_ref = %hook.git_ref, "ignoring deleted ref");
        return HookOutcome::Suppressed;
    }

    let repo = convert_repo(&hook.repository);
    let head = hook
        .head_commit
        .clone()
        .or_else(|| hook.commits.iter().find(|c| c.id == hook.after).cloned())
        .unwrap_or_default();
    let sender = if hook.sender.name().is_empty() {
        &hook.pusher
    } else {
        &hook.sender
    };

    let mut pipeline = Pipeline {
        event: EventKind::Push,
        commit: hook.after.clone(),
        branch: short_ref(&hook.git_ref).to_string(),
        git_ref: hook.git_ref.clone(),
        title: head.message.lines().next().unwrap_or_default().to_string(),
        message: head.message.clone(),
        timestamp: unix_timestamp(&head.timestamp),
        forge_url: if head.url.is_empty() {
            hook.compare_url.clone()
        } else {
            head.url.clone()
        },
        author: if head.author.username.is_empty() {
            sender.name().to_string()
        } else {
            head.author.username.clone()
        },
        email: head.author.email.clone(),
        avatar: avatar(&hook.repository.html_url, &sender.avatar_url),
        sender: sender.name().to_string(),
        changed_files: hook
            .commits
            .iter()
            .flat_map(|c| c.added.iter().chain(&c.removed).chain(&c.modified))
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

fn pull_pipeline(hook: &types::PullRequestHook, event: EventKind, reasons: Vec<EventReason>) -> Pipeline {
    let pr = &hook.pull_request;
    let from_fork = pr.head.repo_id != pr.base.repo_id;

    Pipeline {
        event,
        event_reason: reasons,
        commit: pr.head.sha.clone(),
        git_ref: format!("refs/pull/{}/head", pr.number),
        branch: pr.base.git_ref.clone(),
        refspec: format!("{}:{}", pr.head.git_ref, pr.base.git_ref),
        title: pr.title.clone(),
        message: pr.title.clone(),
        author: pr.user.name().to_string(),
        email: pr.user.email.clone(),
        avatar: avatar(&hook.repository.html_url, &pr.user.avatar_url),
        sender: hook.sender.name().to_string(),
        forge_url: pr.html_url.clone(),
        timestamp: unix_timestamp(&pr.updated_at),
        pull_request: Some(PullRequest {
            index: pr.number,
            title: pr.title.clone(),
            labels: pr.labels.iter().map(|l| l.name.clone()).collect(),
            from_fork,
        }),
        from_fork,
        ..Default::default()
    }
}

fn convert_pull(hook: types::PullRequestHook) -> HookOutcome {
    let event_name = format!("{EVENT_PULL}:{}", hook.action);

    let (event, reasons) = match hook.action.as_str() {
        "opened" | "reopened" | "synchronized" => (EventKind::Pull, Vec::new()),
        "closed" => (EventKind::PullClosed, Vec::new()),
        // The payload carries no previous label state.
        "label_updated" => (EventKind::PullMetadata, vec![EventReason::LabelUpdated]),
        "label_cleared" => (EventKind::PullMetadata, vec![EventReason::LabelCleared]),
        "assigned" => (EventKind::PullMetadata, vec![EventReason::Assigned]),
        "unassigned" => (EventKind::PullMetadata, vec![EventReason::Unassigned]),
        "milestoned" => (EventKind::PullMetadata, vec![EventReason::Milestoned]),
        "demilestoned" => (EventKind::PullMetadata, vec![EventReason::Demilestoned]),
        "review_requested" => (EventKind::PullMetadata, vec![EventReason::ReviewRequested]),
        "edited" => {
            let mut reasons = Vec::new();
            if let Some(changes) = &hook.changes {
                if changes.title.is_some() {
                    reasons.push(EventReason::TitleEdited);
                }
                if changes.body.is_some() {
                    reasons.push(EventReason::DescriptionEdited);
                }
            }
            if reasons.is_empty() {
                return HookOutcome::ignored(event_name, "edit changed nothing tracked");
            }
            (EventKind::PullMetadata, reasons)
        }
        _ => return HookOutcome::ignored(event_name, "unsupported pull request action"),
    };

    let repo = convert_repo(&hook.repository);
    let pipeline = pull_pipeline(&hook, event, reasons);
    HookOutcome::matched(repo, pipeline)
}

fn convert_approval(hook: types::PullRequestHook) -> HookOutcome {
    let repo = convert_repo(&hook.repository);
    let pipeline = pull_pipeline(&hook, EventKind::PullMetadata, vec![EventReason::Approved]);
    HookOutcome::matched(repo, pipeline)
}

fn convert_release(hook: types::ReleaseHook) -> HookOutcome {
    if hook.action != "published" {
        return HookOutcome::ignored(
            format!("{EVENT_RELEASE}:{}", hook.action),
            "only published releases trigger pipelines",
        );
    }

    let repo = convert_repo(&hook.repository);
    let release = &hook.release;
    let name = if release.name.is_empty() {
        release.tag_name.clone()
    } else {
        release.name.clone()
    };

    let pipeline = Pipeline {
        event: EventKind::Release,
        git_ref: format!("refs/tags/{}", release.tag_name),
        branch: release.target_commitish.clone(),
        title: name.clone(),
        message: format!("created release {name}"),
        forge_url: release.html_url.clone(),
        author: release.author.name().to_string(),
        email: release.author.email.clone(),
        avatar: avatar(&hook.repository.html_url, &release.author.avatar_url),
        sender: hook.sender.name().to_string(),
        release: Some(Release {
            tag: release.tag_name.clone(),
            title: name,
            prerelease: release.prerelease,
        }),
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}
