//! Bitbucket Cloud webhook normalization.

use std::sync::OnceLock;

use forgeline_core::hook::{BRANCH_REF_PREFIX, TAG_REF_PREFIX};
use forgeline_core::{
    EventKind, EventReason, ForgeResult, HookOutcome, HookRequest, Pipeline, PullRequest, Repo,
    Visibility,
};
use regex::Regex;
use tracing::debug;

use super::types;
use crate::common::unix_timestamp;

pub const EVENT_HEADER: &str = "X-Event-Key";

const EVENT_PUSH: &str = "repo:push";
const EVENT_PULL_CREATED: &str = "pullrequest:created";
const EVENT_PULL_UPDATED: &str = "pullrequest:updated";
const EVENT_PULL_FULFILLED: &str = "pullrequest:fulfilled";
const EVENT_PULL_REJECTED: &str = "pullrequest:rejected";
const EVENT_PULL_APPROVED: &str = "pullrequest:approved";
const EVENT_PULL_UNAPPROVED: &str = "pullrequest:unapproved";

const TAG_KINDS: &[&str] = &["tag", "annotated_tag", "bookmark"];

/// Normalize a Bitbucket webhook.
pub fn parse_hook(req: &HookRequest) -> ForgeResult<HookOutcome> {
    let event = req.header(EVENT_HEADER).unwrap_or_default();
    let pull = |kind: EventKind, reasons: Vec<EventReason>| -> ForgeResult<HookOutcome> {
        Ok(convert_pull(serde_json::from_slice(&req.body)?, kind, reasons))
    };

    match event {
        EVENT_PUSH => Ok(convert_push(serde_json::from_slice(&req.body)?)),
        EVENT_PULL_CREATED | EVENT_PULL_UPDATED => pull(EventKind::Pull, Vec::new()),
        EVENT_PULL_FULFILLED | EVENT_PULL_REJECTED => pull(EventKind::PullClosed, Vec::new()),
        EVENT_PULL_APPROVED => pull(EventKind::PullMetadata, vec![EventReason::Approved]),
        EVENT_PULL_UNAPPROVED => pull(EventKind::PullMetadata, vec![EventReason::Unapproved]),
        other => {
            debug!(event = other, "unsupported bitbucket event");
            Ok(HookOutcome::ignored(other, "unsupported event type"))
        }
    }
}

/// Email from a raw `Name <email>` author string.
pub(crate) fn extract_email(raw: &str) -> String {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"<([^<>@\s]+@[^<>\s]+)>").ok())
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// HTTPS clone URL with any embedded `user@` removed.
pub(crate) fn clone_url(repo: &types::Repository) -> String {
    let link = repo
        .links
        .clone
        .iter()
        .find(|l| l.name == "https")
        .map(|l| l.href.clone())
        .unwrap_or_else(|| {
            let html = repo.links.html();
            if html.is_empty() {
                String::new()
            } else {
                format!("{html}.git")
            }
        });

    match url::Url::parse(&link) {
        Ok(mut parsed) => {
            // Only fails for cannot-be-a-base URLs, which clone links never are.
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.into()
        }
        Err(_) => link,
    }
}

pub(crate) fn convert_repo(from: &types::Repository) -> Repo {
    let (owner, name) = Repo::split_full_name(&from.full_name);
    let ssh = from
        .links
        .clone
        .iter()
        .find(|l| l.name == "ssh")
        .map(|l| l.href.clone())
        .unwrap_or_default();

    Repo {
        forge_remote_id: from.uuid.clone(),
        owner,
        name: if name.is_empty() { from.name.clone() } else { name },
        full_name: from.full_name.clone(),
        avatar: from.links.avatar(),
        forge_url: from.links.html(),
        clone: clone_url(from),
        clone_ssh: ssh,
        default_branch: from
            .mainbranch
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_default(),
        visibility: Visibility::from_private(from.is_private),
        pr_enabled: true,
        ..Default::default()
    }
}

fn convert_push(hook: types::PushHook) -> HookOutcome {
    let Some(change) = hook.push.changes.iter().find_map(|c| c.new.as_ref()) else {
        debug!(repo = %hook.repository.full_name, "push without a new target");
        return HookOutcome::Suppressed;
    };

    let repo = convert_repo(&hook.repository);
    let target = &change.target;
    let is_tag = TAG_KINDS.contains(&change.kind.as_str());

    let pipeline = Pipeline {
        event: if is_tag { EventKind::Tag } else { EventKind::Push },
        commit: target.hash.clone(),
        git_ref: if is_tag {
            format!("{TAG_REF_PREFIX}{}", change.name)
        } else {
            format!("{BRANCH_REF_PREFIX}{}", change.name)
        },
        branch: change.name.clone(),
        title: target.message.lines().next().unwrap_or_default().to_string(),
        message: target.message.clone(),
        timestamp: unix_timestamp(&target.date),
        forge_url: target.links.html(),
        author: hook.actor.login().to_string(),
        email: extract_email(&target.author.raw),
        avatar: hook.actor.links.avatar(),
        sender: hook.actor.login().to_string(),
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}

fn convert_pull(
    hook: types::PullRequestHook,
    event: EventKind,
    reasons: Vec<EventReason>,
) -> HookOutcome {
    let repo = convert_repo(&hook.repository);
    let pr = &hook.pullrequest;
    let from_fork = pr.source.repository.full_name != pr.destination.repository.full_name;

    let pipeline = Pipeline {
        event,
        event_reason: reasons,
        commit: pr.source.commit.hash.clone(),
        git_ref: format!("refs/pull-requests/{}/from", pr.id),
        branch: pr.destination.branch.name.clone(),
        refspec: format!("{}:{}", pr.source.branch.name, pr.destination.branch.name),
        title: pr.title.clone(),
        message: pr.title.clone(),
        author: pr.author.login().to_string(),
        avatar: pr.author.links.avatar(),
        sender: hook.actor.login().to_string(),
        forge_url: pr.links.html(),
        timestamp: unix_timestamp(&pr.updated_on),
        pull_request: Some(PullRequest {
            index: pr.id,
            title: pr.title.clone(),
            labels: Default::default(),
            from_fork,
        }),
        from_fork,
        ..Default::default()
    };

    HookOutcome::matched(repo, pipeline)
}
