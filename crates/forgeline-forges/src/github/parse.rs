//! GitHub webhook normalization.

use forgeline_core::hook::{is_tag_ref, label_reason, short_ref, PreviousLabels, BRANCH_REF_PREFIX};
use forgeline_core::{
    ChangedFiles, Deployment, EventKind, EventReason, ForgeError, ForgeResult, HookOutcome,
    HookRequest, Permission, Pipeline, PullRequest, Release, Repo, Visibility,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types;
use crate::common::unix_timestamp;

pub const EVENT_HEADER: &str = "X-GitHub-Event";

const EVENT_PUSH: &str = "push";
const EVENT_PULL: &str = "pull_request";
const EVENT_REVIEW: &str = "pull_request_review";
const EVENT_DEPLOY: &str = "deployment";
const EVENT_RELEASE: &str = "release";

/// Normalize a GitHub webhook.
pub fn parse_hook(req: &HookRequest, merge_ref: bool) -> ForgeResult<HookOutcome> {
    let event = req.header(EVENT_HEADER).unwrap_or_default();
    match event {
        EVENT_PUSH => Ok(convert_push(decode(req)?)),
        EVENT_PULL => Ok(convert_pull(decode(req)?, merge_ref)),
        EVENT_REVIEW => Ok(convert_review(decode(req)?, merge_ref)),
        EVENT_DEPLOY => Ok(convert_deployment(decode(req)?)),
        EVENT_RELEASE => Ok(convert_release(decode(req)?)),
        other => {
            debug!(event = other, "unsupported github event");
            Ok(HookOutcome::ignored(other, "unsupported event type"))
        }
    }
}

/// Decode the JSON body, unwrapping a form-encoded `payload` field.
fn decode<T: DeserializeOwned>(req: &HookRequest) -> ForgeResult<T> {
    let is_form = req
        .header("Content-Type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let payload = url::form_urlencoded::parse(&req.body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| ForgeError::MalformedPayload("form body without payload".into()))?;
        Ok(serde_json::from_str(&payload)?)
    } else {
        Ok(serde_json::from_slice(&req.body)?)
    }
}

pub(crate) fn convert_repo(from: &types::Repository) -> Repo {
    let visibility = match from.visibility.as_deref() {
        Some("internal") => Visibility::Internal,
        Some("private") => Visibility::Private,
        Some("public") => Visibility::Public,
        _ => Visibility::from_private(from.private),
    };
    let mut repo = Repo {
        forge_remote_id: from.id.to_string(),
        owner: from.owner.login.clone(),
        name: from.name.clone(),
        full_name: from.full_name.clone(),
        avatar: from.owner.avatar_url.clone(),
        forge_url: from.html_url.clone(),
        clone: from.clone_url.clone(),
        clone_ssh: from.ssh_url.clone(),
        default_branch: from.default_branch.clone(),
        visibility,
        perm: from
            .permissions
            .as_ref()
            .map(|p| Permission::new(p.pull, p.push, p.admin)),
        pr_enabled: true,
        ..Default::default()
    };
    repo.ensure_full_name();
    repo
}

fn changed_files(commits: &[types::HookCommit]) -> ChangedFiles {
    commits
        .iter()
        .flat_map(|c| c.added.iter().chain(&c.removed).chain(&c.modified))
        .cloned()
        .collect()
}

fn convert_push(hook: types::PushHook) -> HookOutcome {
    if hook.deleted {
        debug!(git_ref = %hook.git_ref, "ignoring deleted ref");
        return HookOutcome::Suppressed;
    }

    let repo = convert_repo(&hook.repository);
    let head = hook.head_commit.clone().unwrap_or_default();
    let author = if hook.sender.login.is_empty() {
        head.author.username.clone()
    } else {
        hook.sender.login.clone()
    };

    let mut pipeline = Pipeline {
        event: EventKind::Push,
        commit: hook.after.clone(),
        branch: short_ref(&hook.git_ref).to_string(),
        git_ref: hook.git_ref.clone(),
        message: head.message.clone(),
        title: head.message.lines().next().unwrap_or_default().to_string(),
        timestamp: unix_timestamp(&head.timestamp),
        author,
        email: head.author.email.clone(),
        avatar: hook.sender.avatar_url.clone(),
        sender: hook.sender.login.clone(),
        forge_url: if head.url.is_empty() {
            hook.compare.clone()
        } else {
            head.url.clone()
        },
        changed_files: changed_files(&hook.commits),
        ..Default::default()
    };

    if is_tag_ref(&pipeline.git_ref) {
        pipeline.event = EventKind::Tag;
        pipeline.changed_files = ChangedFiles::new();
        if let Some(base_ref) = hook.base_ref.as_deref().filter(|r| !r.is_empty()) {
            pipeline.branch = short_ref(base_ref).to_string();
        }
    }

    HookOutcome::matched(repo, pipeline)
}

/// Shared pull-request fields for `pull_request` and `pull_request_review`.
fn pull_pipeline(
    pr: &types::PullRequest,
    sender: &types::User,
    merge_ref: bool,
    event: EventKind,
    reasons: Vec<EventReason>,
) -> Pipeline {
    let from_fork = match (&pr.head.repo, &pr.base.repo) {
        (Some(head), Some(base)) => head.id != base.id,
        _ => false,
    };
    let git_ref = if merge_ref {
        format!("refs/pull/{}/merge", pr.number)
    } else {
        format!("refs/pull/{}/head", pr.number)
    };

    Pipeline {
        event,
        event_reason: reasons,
        commit: pr.head.sha.clone(),
        git_ref,
        branch: pr.base.git_ref.clone(),
        refspec: format!("{}:{}", pr.head.git_ref, pr.base.git_ref),
        title: pr.title.clone(),
        message: pr.title.clone(),
        author: pr.user.login.clone(),
        avatar: pr.user.avatar_url.clone(),
        sender: sender.login.clone(),
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

fn convert_pull(hook: types::PullRequestHook, merge_ref: bool) -> HookOutcome {
    let action = hook.action.as_str();
    let event_name = format!("{EVENT_PULL}:{action}");

    let (event, reasons) = match action {
        "opened" | "reopened" | "synchronize" => (EventKind::Pull, Vec::new()),
        "closed" => (EventKind::PullClosed, Vec::new()),
        "labeled" | "unlabeled" => {
            // `labels` is the set after the change.
            let count = hook.pull_request.labels.len();
            let previous = if action == "labeled" && count == 1 {
                PreviousLabels::Empty
            } else {
                PreviousLabels::Present
            };
            (EventKind::PullMetadata, vec![label_reason(previous, count)])
        }
        "assigned" => (EventKind::PullMetadata, vec![EventReason::Assigned]),
        "unassigned" => (EventKind::PullMetadata, vec![EventReason::Unassigned]),
        "milestoned" => (EventKind::PullMetadata, vec![EventReason::Milestoned]),
        "demilestoned" => (EventKind::PullMetadata, vec![EventReason::Demilestoned]),
        "review_requested" => (EventKind::PullMetadata, vec![EventReason::ReviewRequested]),
        "locked" => (EventKind::PullMetadata, vec![EventReason::Locked]),
        "unlocked" => (EventKind::PullMetadata, vec![EventReason::Unlocked]),
        "ready_for_review" => (EventKind::PullMetadata, vec![EventReason::ReadyForReview]),
        "converted_to_draft" => (EventKind::PullMetadata, vec![EventReason::ConvertedToDraft]),
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
    let pipeline = pull_pipeline(&hook.pull_request, &hook.sender, merge_ref, event, reasons);
    HookOutcome::matched(repo, pipeline)
}

fn convert_review(hook: types::ReviewHook, merge_ref: bool) -> HookOutcome {
    let reason = match (hook.action.as_str(), hook.review.state.as_str()) {
        ("submitted", "approved") => EventReason::Approved,
        ("dismissed", _) => EventReason::Unapproved,
        (action, state) => {
            return HookOutcome::ignored(
                format!("{EVENT_REVIEW}:{action}"),
                format!("review state '{state}' is not tracked"),
            )
        }
    };

    let repo = convert_repo(&hook.repository);
    let pipeline = pull_pipeline(
        &hook.pull_request,
        &hook.sender,
        merge_ref,
        EventKind::PullMetadata,
        vec![reason],
    );
    HookOutcome::matched(repo, pipeline)
}

fn convert_deployment(hook: types::DeploymentHook) -> HookOutcome {
    let repo = convert_repo(&hook.repository);
    let deployment = &hook.deployment;

    let mut pipeline = Pipeline {
        event: EventKind::Deploy,
        commit: deployment.sha.clone(),
        git_ref: deployment.git_ref.clone(),
        branch: deployment.git_ref.clone(),
        message: deployment.description.clone(),
        title: deployment.description.clone(),
        forge_url: deployment.url.clone(),
        author: hook.sender.login.clone(),
        avatar: hook.sender.avatar_url.clone(),
        sender: hook.sender.login.clone(),
        deploy: Some(Deployment {
            environment: deployment.environment.clone(),
            task: deployment.task.clone(),
        }),
        ..Default::default()
    };

    // A deployment of a (short) SHA has no ref; build on the default branch.
    if !pipeline.git_ref.is_empty() && pipeline.commit.starts_with(&pipeline.git_ref) {
        pipeline.branch = if repo.default_branch.is_empty() {
            "main".to_string()
        } else {
            repo.default_branch.clone()
        };
        pipeline.git_ref = format!("{BRANCH_REF_PREFIX}{}", pipeline.branch);
    }
    if !pipeline.git_ref.starts_with("refs/") {
        pipeline.git_ref = format!("{BRANCH_REF_PREFIX}{}", pipeline.branch);
    }

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
        author: release.author.login.clone(),
        avatar: release.author.avatar_url.clone(),
        sender: hook.sender.login.clone(),
        release: Some(Release {
            tag: release.tag_name.clone(),
            title: name,
            prerelease: release.prerelease,
        }),
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}
