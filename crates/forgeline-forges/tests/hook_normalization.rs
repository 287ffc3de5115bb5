//! Webhook normalization across every adapter.

use std::sync::Arc;

use forgeline_core::fakes::MockTransport;
use forgeline_core::transport::ApiTransport;
use forgeline_core::{EventKind, EventReason, Forge, ForgeKind, HookOutcome, HookRequest};
use forgeline_forges::{build_forge, ForgeOptions};
use serde_json::{json, Value};

fn forge(kind: ForgeKind) -> Arc<dyn Forge> {
    forge_with(kind, ForgeOptions::new(match kind {
        ForgeKind::Gitea | ForgeKind::Forgejo => "https://gitea.example.com",
        _ => "",
    }))
}

fn forge_with(kind: ForgeKind, options: ForgeOptions) -> Arc<dyn Forge> {
    let transport: Arc<dyn ApiTransport> = Arc::new(MockTransport::new());
    build_forge(kind, options, transport).unwrap()
}

fn request(header: &str, event: &str, body: &Value) -> HookRequest {
    HookRequest::new(serde_json::to_vec(body).unwrap()).with_header(header, event)
}

fn matched(outcome: HookOutcome) -> (forgeline_core::Repo, forgeline_core::Pipeline) {
    match outcome {
        HookOutcome::Matched { repo, pipeline } => (repo, pipeline),
        other => panic!("expected a match, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

fn github_repo() -> Value {
    json!({
        "id": 1296269,
        "name": "hello",
        "full_name": "octo/hello",
        "owner": {"login": "octo", "avatar_url": "https://avatars.example/octo"},
        "html_url": "https://github.com/octo/hello",
        "clone_url": "https://github.com/octo/hello.git",
        "ssh_url": "git@github.com:octo/hello.git",
        "default_branch": "main",
        "private": false
    })
}

fn github_push(git_ref: &str) -> Value {
    json!({
        "ref": git_ref,
        "before": "1111111111111111111111111111111111111111",
        "after": "2222222222222222222222222222222222222222",
        "deleted": false,
        "compare": "https://github.com/octo/hello/compare/1...2",
        "head_commit": {
            "id": "2222222222222222222222222222222222222222",
            "message": "fix parser\n\nlonger body",
            "timestamp": "2024-01-01T00:00:00Z",
            "url": "https://github.com/octo/hello/commit/2222",
            "author": {"name": "Octo", "email": "octo@example.com", "username": "octo"}
        },
        "commits": [
            {"id": "a", "added": ["src/new.rs"], "removed": [], "modified": ["README.md"]},
            {"id": "b", "added": [], "removed": ["old.rs"], "modified": ["README.md", ""]}
        ],
        "sender": {"login": "octo", "avatar_url": "https://avatars.example/octo"},
        "repository": github_repo()
    })
}

fn github_pull(action: &str, labels: &[&str]) -> Value {
    let labels: Vec<Value> = labels.iter().map(|l| json!({"name": l})).collect();
    json!({
        "action": action,
        "number": 42,
        "pull_request": {
            "number": 42,
            "title": "Add feature",
            "html_url": "https://github.com/octo/hello/pull/42",
            "user": {"login": "contrib", "avatar_url": "https://avatars.example/contrib"},
            "head": {"ref": "feature", "sha": "3333", "repo": {"id": 99}},
            "base": {"ref": "main", "sha": "4444", "repo": {"id": 1296269}},
            "labels": labels,
            "updated_at": "2024-01-01T00:00:00Z"
        },
        "repository": github_repo(),
        "sender": {"login": "contrib"}
    })
}

#[test]
fn github_push_collects_unique_changed_files() {
    let outcome = forge(ForgeKind::Github)
        .parse_hook(&request("X-GitHub-Event", "push", &github_push("refs/heads/main")))
        .unwrap();
    let (repo, pipeline) = matched(outcome);

    assert_eq!(repo.full_name, "octo/hello");
    assert_eq!(pipeline.event, EventKind::Push);
    assert_eq!(pipeline.branch, "main");
    assert_eq!(pipeline.title, "fix parser");
    assert_eq!(pipeline.email, "octo@example.com");
    assert_eq!(pipeline.timestamp, 1_704_067_200);
    assert_eq!(
        pipeline.changed_files.as_slice(),
        ["src/new.rs", "README.md", "old.rs"]
    );
}

#[test]
fn github_tag_push_is_reclassified() {
    let mut body = github_push("refs/tags/v1.2.0");
    body["base_ref"] = json!("refs/heads/release");
    let (_, pipeline) = matched(
        forge(ForgeKind::Github)
            .parse_hook(&request("X-GitHub-Event", "push", &body))
            .unwrap(),
    );

    assert_eq!(pipeline.event, EventKind::Tag);
    assert_eq!(pipeline.git_ref, "refs/tags/v1.2.0");
    assert_eq!(pipeline.branch, "release");
    assert!(pipeline.changed_files.is_empty());
}

#[test]
fn github_deleted_branch_is_suppressed() {
    let mut body = github_push("refs/heads/gone");
    body["deleted"] = json!(true);
    let outcome = forge(ForgeKind::Github)
        .parse_hook(&request("X-GitHub-Event", "push", &body))
        .unwrap();
    assert_eq!(outcome, HookOutcome::Suppressed);
}

#[test]
fn github_form_encoded_payload() {
    let payload = serde_json::to_string(&github_push("refs/heads/main")).unwrap();
    let body = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("payload", &payload)
        .finish();
    let req = HookRequest::new(body)
        .with_header("X-GitHub-Event", "push")
        .with_header("Content-Type", "application/x-www-form-urlencoded");

    let (_, pipeline) = matched(forge(ForgeKind::Github).parse_hook(&req).unwrap());
    assert_eq!(pipeline.commit, "2222222222222222222222222222222222222222");
}

#[test]
fn github_pull_refs_follow_merge_option() {
    let req = request("X-GitHub-Event", "pull_request", &github_pull("opened", &[]));

    let (_, head) = matched(forge(ForgeKind::Github).parse_hook(&req).unwrap());
    assert_eq!(head.event, EventKind::Pull);
    assert_eq!(head.git_ref, "refs/pull/42/head");
    assert_eq!(head.refspec, "feature:main");
    assert_eq!(head.branch, "main");
    assert!(head.from_fork);
    assert_eq!(head.pull_index(), Some(42));

    let merge = forge_with(ForgeKind::Github, ForgeOptions::default().with_merge_ref(true));
    let (_, merged) = matched(merge.parse_hook(&req).unwrap());
    assert_eq!(merged.git_ref, "refs/pull/42/merge");
}

#[test]
fn github_closed_pull() {
    let (_, pipeline) = matched(
        forge(ForgeKind::Github)
            .parse_hook(&request("X-GitHub-Event", "pull_request", &github_pull("closed", &[])))
            .unwrap(),
    );
    assert_eq!(pipeline.event, EventKind::PullClosed);
}

#[test]
fn github_label_reasons() {
    let github = forge(ForgeKind::Github);
    let reason = |action: &str, labels: &[&str]| {
        let req = request("X-GitHub-Event", "pull_request", &github_pull(action, labels));
        let (_, pipeline) = matched(github.parse_hook(&req).unwrap());
        assert_eq!(pipeline.event, EventKind::PullMetadata);
        pipeline.event_reason
    };

    assert_eq!(reason("labeled", &["bug"]), vec![EventReason::LabelAdded]);
    assert_eq!(reason("labeled", &["bug", "ui"]), vec![EventReason::LabelUpdated]);
    assert_eq!(reason("unlabeled", &["bug"]), vec![EventReason::LabelUpdated]);
    assert_eq!(reason("unlabeled", &[]), vec![EventReason::LabelCleared]);
}

#[test]
fn github_edit_reasons() {
    let github = forge(ForgeKind::Github);

    let mut body = github_pull("edited", &[]);
    body["changes"] = json!({"title": {"from": "old"}, "body": {"from": "old body"}});
    let (_, pipeline) = matched(
        github
            .parse_hook(&request("X-GitHub-Event", "pull_request", &body))
            .unwrap(),
    );
    assert_eq!(
        pipeline.event_reason,
        vec![EventReason::TitleEdited, EventReason::DescriptionEdited]
    );

    // An edit of something we do not track yields no reason and must not match.
    let mut body = github_pull("edited", &[]);
    body["changes"] = json!({"base": {"ref": {"from": "dev"}}});
    let outcome = github
        .parse_hook(&request("X-GitHub-Event", "pull_request", &body))
        .unwrap();
    assert!(matches!(outcome, HookOutcome::Ignored(_)));
}

#[test]
fn github_review_events() {
    let github = forge(ForgeKind::Github);
    let review = |action: &str, state: &str| {
        let mut body = github_pull("", &[]);
        body["action"] = json!(action);
        body["review"] = json!({"state": state});
        github
            .parse_hook(&request("X-GitHub-Event", "pull_request_review", &body))
            .unwrap()
    };

    let (_, approved) = matched(review("submitted", "approved"));
    assert_eq!(approved.event_reason, vec![EventReason::Approved]);

    let (_, dismissed) = matched(review("dismissed", "dismissed"));
    assert_eq!(dismissed.event_reason, vec![EventReason::Unapproved]);

    assert!(matches!(review("submitted", "commented"), HookOutcome::Ignored(_)));
}

#[test]
fn github_release_only_when_published() {
    let github = forge(ForgeKind::Github);
    let release = |action: &str| {
        let body = json!({
            "action": action,
            "release": {
                "tag_name": "v2.0.0",
                "name": "Two",
                "target_commitish": "main",
                "prerelease": true,
                "author": {"login": "octo"}
            },
            "repository": github_repo(),
            "sender": {"login": "octo"}
        });
        github
            .parse_hook(&request("X-GitHub-Event", "release", &body))
            .unwrap()
    };

    let (_, pipeline) = matched(release("published"));
    assert_eq!(pipeline.event, EventKind::Release);
    assert_eq!(pipeline.git_ref, "refs/tags/v2.0.0");
    assert_eq!(pipeline.message, "created release Two");
    let info = pipeline.release.unwrap();
    assert_eq!(info.tag, "v2.0.0");
    assert!(info.prerelease);

    assert!(matches!(release("created"), HookOutcome::Ignored(_)));
}

#[test]
fn github_deployment_of_a_sha_builds_default_branch() {
    let body = json!({
        "deployment": {
            "sha": "5555555555555555555555555555555555555555",
            "ref": "5555555",
            "task": "deploy",
            "environment": "production"
        },
        "repository": github_repo(),
        "sender": {"login": "octo"}
    });
    let (_, pipeline) = matched(
        forge(ForgeKind::Github)
            .parse_hook(&request("X-GitHub-Event", "deployment", &body))
            .unwrap(),
    );
    assert_eq!(pipeline.event, EventKind::Deploy);
    assert_eq!(pipeline.branch, "main");
    assert_eq!(pipeline.git_ref, "refs/heads/main");
    assert_eq!(pipeline.deploy.unwrap().environment, "production");
}

#[test]
fn github_unknown_event_is_ignored() {
    let outcome = forge(ForgeKind::Github)
        .parse_hook(&request("X-GitHub-Event", "issues", &json!({})))
        .unwrap();
    match outcome {
        HookOutcome::Ignored(ignored) => assert_eq!(ignored.event, "issues"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn malformed_body_is_an_error() {
    let req = HookRequest::new("not json").with_header("X-GitHub-Event", "push");
    assert!(forge(ForgeKind::Github).parse_hook(&req).is_err());
}

// ---------------------------------------------------------------------------
// GitLab
// ---------------------------------------------------------------------------

fn gitlab_project() -> Value {
    json!({
        "id": 15,
        "name": "app",
        "path_with_namespace": "group/sub/app",
        "web_url": "https://gitlab.com/group/sub/app",
        "git_http_url": "https://gitlab.com/group/sub/app.git",
        "git_ssh_url": "git@gitlab.com:group/sub/app.git",
        "default_branch": "main",
        "visibility_level": 0
    })
}

fn gitlab_push(git_ref: &str, after: &str) -> Value {
    json!({
        "object_kind": "push",
        "ref": git_ref,
        "before": "1111",
        "after": after,
        "user_username": "jdoe",
        "user_email": "jdoe@example.com",
        "project": gitlab_project(),
        "commits": [
            {"id": after, "message": "update docs\n", "timestamp": "2024-01-01T00:00:00+00:00",
             "added": ["docs/a.md"], "modified": ["docs/a.md"], "removed": []}
        ]
    })
}

fn gitlab_mr(action: &str, oldrev: Option<&str>, changes: Value) -> Value {
    json!({
        "object_kind": "merge_request",
        "user": {"username": "jdoe"},
        "project": gitlab_project(),
        "object_attributes": {
            "iid": 7,
            "title": "Refactor",
            "action": action,
            "oldrev": oldrev,
            "source_branch": "refactor",
            "target_branch": "main",
            "source_project_id": 15,
            "target_project_id": 15,
            "last_commit": {"id": "6666", "message": "refactor"}
        },
        "labels": [{"title": "backend"}],
        "changes": changes
    })
}

#[test]
fn gitlab_push_splits_nested_namespace() {
    let (repo, pipeline) = matched(
        forge(ForgeKind::Gitlab)
            .parse_hook(&request(
                "X-Gitlab-Event",
                "Push Hook",
                &gitlab_push("refs/heads/main", "abcd"),
            ))
            .unwrap(),
    );
    assert_eq!(repo.owner, "group/sub");
    assert_eq!(repo.name, "app");
    assert!(repo.is_private());
    assert_eq!(pipeline.commit, "abcd");
    assert_eq!(pipeline.changed_files.as_slice(), ["docs/a.md"]);
}

#[test]
fn gitlab_tag_push_and_deletion() {
    let gitlab = forge(ForgeKind::Gitlab);
    let (_, tag) = matched(
        gitlab
            .parse_hook(&request(
                "X-Gitlab-Event",
                "Tag Push Hook",
                &gitlab_push("refs/tags/v1", "abcd"),
            ))
            .unwrap(),
    );
    assert_eq!(tag.event, EventKind::Tag);
    assert!(tag.changed_files.is_empty());

    let deleted = gitlab
        .parse_hook(&request(
            "X-Gitlab-Event",
            "Push Hook",
            &gitlab_push("refs/heads/x", "0000000000000000000000000000000000000000"),
        ))
        .unwrap();
    assert_eq!(deleted, HookOutcome::Suppressed);
}

#[test]
fn gitlab_merge_request_actions() {
    let gitlab = forge(ForgeKind::Gitlab);
    let parse = |body: Value| {
        gitlab
            .parse_hook(&request("X-Gitlab-Event", "Merge Request Hook", &body))
            .unwrap()
    };

    let (_, opened) = matched(parse(gitlab_mr("open", None, json!({}))));
    assert_eq!(opened.event, EventKind::Pull);
    assert_eq!(opened.git_ref, "refs/merge-requests/7/head");
    assert_eq!(opened.refspec, "refactor:main");
    assert!(!opened.from_fork);

    let (_, pushed) = matched(parse(gitlab_mr("update", Some("5555"), json!({}))));
    assert_eq!(pushed.event, EventKind::Pull);

    let (_, labeled) = matched(parse(gitlab_mr(
        "update",
        None,
        json!({"labels": {"previous": [], "current": [{"title": "backend"}]}}),
    )));
    assert_eq!(labeled.event, EventKind::PullMetadata);
    assert_eq!(labeled.event_reason, vec![EventReason::LabelAdded]);

    let (_, edited) = matched(parse(gitlab_mr(
        "update",
        None,
        json!({"title": {"previous": "a", "current": "b"}, "draft": {"previous": true, "current": false}}),
    )));
    assert_eq!(
        edited.event_reason,
        vec![EventReason::TitleEdited, EventReason::ReadyForReview]
    );

    assert!(matches!(
        parse(gitlab_mr("update", None, json!({"updated_at": {}}))),
        HookOutcome::Ignored(_)
    ));

    let (_, merged) = matched(parse(gitlab_mr("merge", None, json!({}))));
    assert_eq!(merged.event, EventKind::PullClosed);

    let (_, approved) = matched(parse(gitlab_mr("approved", None, json!({}))));
    assert_eq!(approved.event_reason, vec![EventReason::Approved]);

    assert!(matches!(
        parse(gitlab_mr("approval", None, json!({}))),
        HookOutcome::Ignored(_)
    ));
}

#[test]
fn gitlab_release_only_on_create() {
    let gitlab = forge(ForgeKind::Gitlab);
    let release = |action: &str| {
        let body = json!({
            "action": action,
            "name": "v3",
            "tag": "v3.0.0",
            "project": gitlab_project(),
            "commit": {"id": "7777"}
        });
        gitlab
            .parse_hook(&request("X-Gitlab-Event", "Release Hook", &body))
            .unwrap()
    };

    let (_, pipeline) = matched(release("create"));
    assert_eq!(pipeline.event, EventKind::Release);
    assert_eq!(pipeline.git_ref, "refs/tags/v3.0.0");
    assert!(matches!(release("update"), HookOutcome::Ignored(_)));
}

// ---------------------------------------------------------------------------
// Gitea / Forgejo
// ---------------------------------------------------------------------------

fn gitea_repo() -> Value {
    json!({
        "id": 3,
        "owner": {"login": "gitea", "avatar_url": "/avatars/gitea"},
        "name": "tea",
        "full_name": "gitea/tea",
        "html_url": "https://gitea.example.com/gitea/tea",
        "clone_url": "https://gitea.example.com/gitea/tea.git",
        "default_branch": "main"
    })
}

fn gitea_pull(action: &str) -> Value {
    json!({
        "action": action,
        "number": 5,
        "pull_request": {
            "number": 5,
            "title": "Tea time",
            "user": {"login": "brewer", "avatar_url": "http:///gitea.example.com/avatars/b"},
            "labels": [],
            "head": {"ref": "feat", "sha": "8888", "repo_id": 3},
            "base": {"ref": "main", "sha": "9999", "repo_id": 3}
        },
        "repository": gitea_repo(),
        "sender": {"login": "brewer"}
    })
}

#[test]
fn gitea_tag_push_and_create_event() {
    let gitea = forge(ForgeKind::Gitea);
    let push = json!({
        "ref": "refs/tags/v0.1.0",
        "after": "abcdef",
        "commits": [{"id": "abcdef", "message": "tag", "added": ["x"]}],
        "repository": gitea_repo(),
        "sender": {"login": "gitea", "avatar_url": "/avatars/gitea"}
    });

    let (repo, pipeline) = matched(
        gitea
            .parse_hook(&request("X-Gitea-Event", "push", &push))
            .unwrap(),
    );
    assert_eq!(pipeline.event, EventKind::Tag);
    assert!(pipeline.changed_files.is_empty());
    assert_eq!(repo.avatar, "https://gitea.example.com/avatars/gitea");
    assert_eq!(pipeline.avatar, "https://gitea.example.com/avatars/gitea");

    let created = gitea
        .parse_hook(&request("X-Gitea-Event", "create", &push))
        .unwrap();
    assert!(matches!(created, HookOutcome::Ignored(_)));
}

fn gitea_branch_deletion() -> Value {
    json!({
        "ref": "refs/heads/feature",
        "before": "4f1b0c2d",
        "after": "0000000000000000000000000000000000000000",
        "commits": [],
        "repository": gitea_repo(),
        "sender": {"login": "gitea"}
    })
}

#[test]
fn gitea_deleted_branch_is_suppressed() {
    let outcome = forge(ForgeKind::Gitea)
        .parse_hook(&request("X-Gitea-Event", "push", &gitea_branch_deletion()))
        .unwrap();
    assert_eq!(outcome, HookOutcome::Suppressed);
}

#[test]
fn forgejo_deleted_branch_is_suppressed() {
    let outcome = forge(ForgeKind::Forgejo)
        .parse_hook(&request("X-Forgejo-Event", "push", &gitea_branch_deletion()))
        .unwrap();
    assert_eq!(outcome, HookOutcome::Suppressed);
}

#[test]
fn gitea_label_events_have_no_previous_state() {
    let gitea = forge(ForgeKind::Gitea);

    let (_, updated) = matched(
        gitea
            .parse_hook(&request("X-Gitea-Event", "pull_request", &gitea_pull("label_updated")))
            .unwrap(),
    );
    assert_eq!(updated.event_reason, vec![EventReason::LabelUpdated]);

    let (_, cleared) = matched(
        gitea
            .parse_hook(&request("X-Gitea-Event", "pull_request", &gitea_pull("label_cleared")))
            .unwrap(),
    );
    assert_eq!(cleared.event_reason, vec![EventReason::LabelCleared]);
}

#[test]
fn forgejo_header_and_pull_fields() {
    let forgejo = forge(ForgeKind::Forgejo);
    let (_, pipeline) = matched(
        forgejo
            .parse_hook(&request("X-Forgejo-Event", "pull_request", &gitea_pull("synchronized")))
            .unwrap(),
    );
    assert_eq!(pipeline.event, EventKind::Pull);
    assert_eq!(pipeline.git_ref, "refs/pull/5/head");
    assert_eq!(pipeline.avatar, "https://gitea.example.com/avatars/b");
    assert!(!pipeline.from_fork);
}

#[test]
fn gitea_review_approval() {
    let (_, pipeline) = matched(
        forge(ForgeKind::Gitea)
            .parse_hook(&request(
                "X-Gitea-Event",
                "pull_request_review_approved",
                &gitea_pull("reviewed"),
            ))
            .unwrap(),
    );
    assert_eq!(pipeline.event, EventKind::PullMetadata);
    assert_eq!(pipeline.event_reason, vec![EventReason::Approved]);
}

// ---------------------------------------------------------------------------
// Bitbucket
// ---------------------------------------------------------------------------

fn bitbucket_repo() -> Value {
    json!({
        "uuid": "{repo-uuid}",
        "name": "app",
        "full_name": "team/app",
        "is_private": true,
        "links": {"html": {"href": "https://bitbucket.org/team/app"}}
    })
}

fn bitbucket_push(changes: Value) -> Value {
    json!({
        "actor": {"nickname": "ada", "links": {"avatar": {"href": "https://avatar/ada"}}},
        "repository": bitbucket_repo(),
        "push": {"changes": changes}
    })
}

#[test]
fn bitbucket_push_and_tag() {
    let bitbucket = forge(ForgeKind::Bitbucket);
    let change = |kind: &str, name: &str| {
        json!([{
            "new": {
                "type": kind,
                "name": name,
                "target": {
                    "hash": "cafe",
                    "message": "ship it",
                    "date": "2024-01-01T00:00:00+00:00",
                    "author": {"raw": "Ada <ada@example.com>"}
                }
            }
        }])
    };

    let (repo, push) = matched(
        bitbucket
            .parse_hook(&request("X-Event-Key", "repo:push", &bitbucket_push(change("branch", "main"))))
            .unwrap(),
    );
    assert_eq!(repo.full_name, "team/app");
    assert_eq!(repo.clone, "https://bitbucket.org/team/app.git");
    assert_eq!(push.event, EventKind::Push);
    assert_eq!(push.git_ref, "refs/heads/main");
    assert_eq!(push.email, "ada@example.com");

    let (_, tag) = matched(
        bitbucket
            .parse_hook(&request(
                "X-Event-Key",
                "repo:push",
                &bitbucket_push(change("annotated_tag", "v1")),
            ))
            .unwrap(),
    );
    assert_eq!(tag.event, EventKind::Tag);
    assert_eq!(tag.git_ref, "refs/tags/v1");
}

#[test]
fn bitbucket_deleted_branch_is_suppressed() {
    let body = bitbucket_push(json!([{"new": null, "old": {"type": "branch", "name": "gone"}}]));
    let outcome = forge(ForgeKind::Bitbucket)
        .parse_hook(&request("X-Event-Key", "repo:push", &body))
        .unwrap();
    assert_eq!(outcome, HookOutcome::Suppressed);
}

#[test]
fn bitbucket_pull_request_events() {
    let bitbucket = forge(ForgeKind::Bitbucket);
    let body = json!({
        "actor": {"nickname": "ada"},
        "repository": bitbucket_repo(),
        "pullrequest": {
            "id": 12,
            "title": "Fix",
            "author": {"nickname": "ada"},
            "source": {"branch": {"name": "fix"}, "commit": {"hash": "beef"},
                       "repository": {"full_name": "ada/app"}},
            "destination": {"branch": {"name": "main"}, "commit": {"hash": "f00d"},
                            "repository": {"full_name": "team/app"}}
        }
    });

    let (_, created) = matched(
        bitbucket
            .parse_hook(&request("X-Event-Key", "pullrequest:created", &body))
            .unwrap(),
    );
    assert_eq!(created.event, EventKind::Pull);
    assert_eq!(created.commit, "beef");
    assert_eq!(created.refspec, "fix:main");
    assert!(created.from_fork);

    let (_, fulfilled) = matched(
        bitbucket
            .parse_hook(&request("X-Event-Key", "pullrequest:fulfilled", &body))
            .unwrap(),
    );
    assert_eq!(fulfilled.event, EventKind::PullClosed);

    let (_, unapproved) = matched(
        bitbucket
            .parse_hook(&request("X-Event-Key", "pullrequest:unapproved", &body))
            .unwrap(),
    );
    assert_eq!(unapproved.event_reason, vec![EventReason::Unapproved]);

    let ignored = bitbucket
        .parse_hook(&request("X-Event-Key", "repo:fork", &body))
        .unwrap();
    assert!(matches!(ignored, HookOutcome::Ignored(_)));
}
