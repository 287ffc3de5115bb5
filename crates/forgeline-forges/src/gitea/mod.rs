//! Gitea and Forgejo. Forgejo is a Gitea fork with the same API; only the
//! kind, the event header and the webhook type differ.

mod parse;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use forgeline_core::forge::matching_hooks;
use forgeline_core::transport::{ApiRequest, ApiTransport};
use forgeline_core::{
    Commit, CommitStatus, FileBlob, Forge, ForgeError, ForgeKind, ForgeResult, HookOutcome,
    HookRequest, LoginFlow, LoginRequest, NetrcCredential, Pipeline, Repo, RepoLookup,
    StatusState, Team, User,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::common::{dir_prefix, encode_segment, fetch_all_files, get_all_linked, revision};
use crate::ForgeOptions;

pub use parse::{parse_hook, EVENT_HEADER, FORGEJO_EVENT_HEADER};

const PAGE_SIZE: u32 = 50;
const HOOK_EVENTS: &[&str] = &[
    "push",
    "create",
    "pull_request",
    "pull_request_review_approved",
    "release",
];

/// Gitea / Forgejo adapter.
pub struct Gitea {
    kind: ForgeKind,
    url: String,
    api: String,
    options: ForgeOptions,
    transport: Arc<dyn ApiTransport>,
}

impl Gitea {
    /// `kind` is either [`ForgeKind::Gitea`] or [`ForgeKind::Forgejo`].
    pub fn new(kind: ForgeKind, options: ForgeOptions, transport: Arc<dyn ApiTransport>) -> Self {
        let url = options.web_url("");
        let api = options.api_base(format!("{url}/api/v1"));
        Self {
            kind,
            url,
            api,
            options,
            transport,
        }
    }

    fn repo_url(&self, repo: &Repo, rest: &str) -> String {
        format!("{}/repos/{}/{}/{rest}", self.api, repo.owner, repo.name)
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<T> {
        self.transport
            .send(ApiRequest::get(url).with_bearer(token))
            .await?
            .json()
    }

    async fn get_all<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<Vec<T>> {
        get_all_linked(self.transport.as_ref(), url, |req| req.with_bearer(token)).await
    }

    /// Walk the contents API and collect every file below `path`, sorted.
    async fn list_files(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<String>> {
        let rev = encode_segment(revision(pipeline));
        let mut pending = vec![path.trim_matches('/').to_string()];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let entries: Vec<types::ContentEntry> = self
                .get(
                    &user.access_token,
                    self.repo_url(repo, &format!("contents/{dir}?ref={rev}")),
                )
                .await?;
            for entry in entries {
                match entry.kind.as_str() {
                    "file" => files.push(entry.path),
                    "dir" => pending.push(entry.path),
                    _ => {}
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn status_state(state: StatusState) -> &'static str {
    match state {
        StatusState::Pending | StatusState::Running => "pending",
        StatusState::Success => "success",
        StatusState::Failure => "failure",
        StatusState::Killed | StatusState::Error => "error",
        StatusState::Skipped => "warning",
    }
}

#[async_trait]
impl Forge for Gitea {
    fn kind(&self) -> ForgeKind {
        self.kind
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, req), fields(forge = %self.kind))]
    async fn login(&self, req: &LoginRequest) -> ForgeResult<LoginFlow> {
        if let Some(error) = &req.error {
            let description = req.error_description.clone().unwrap_or_default();
            return Err(ForgeError::Unauthorized(format!("{error}: {description}")));
        }

        let Some(code) = req.code.as_deref().filter(|c| !c.is_empty()) else {
            let mut redirect = url::Url::parse(&format!("{}/login/oauth/authorize", self.url))
                .map_err(|e| ForgeError::Unsupported(format!("forge url: {e}")))?;
            redirect
                .query_pairs_mut()
                .append_pair("client_id", &self.options.client_id)
                .append_pair("redirect_uri", &self.options.redirect_url)
                .append_pair("response_type", "code")
                .append_pair("state", req.state.as_deref().unwrap_or_default());
            return Ok(LoginFlow::Redirect(redirect.into()));
        };

        let token: types::AccessToken = self
            .transport
            .send(
                ApiRequest::post(format!("{}/login/oauth/access_token", self.url)).with_form(&[
                    ("grant_type", "authorization_code"),
                    ("client_id", self.options.client_id.as_str()),
                    ("client_secret", self.options.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", self.options.redirect_url.as_str()),
                ]),
            )
            .await?
            .json()?;

        let account: types::User = self
            .get(&token.access_token, format!("{}/user", self.api))
            .await?;
        Ok(LoginFlow::Authenticated(User {
            login: account.name().to_string(),
            email: account.email.clone(),
            avatar: parse::fix_malformed_avatar(&account.avatar_url),
            forge_remote_id: account.id.to_string(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: if token.expires_in > 0 {
                chrono::Utc::now().timestamp() + token.expires_in
            } else {
                0
            },
        }))
    }

    async fn auth(&self, token: &str) -> ForgeResult<String> {
        let account: types::User = self.get(token, format!("{}/user", self.api)).await?;
        Ok(account.name().to_string())
    }

    async fn teams(&self, user: &User) -> ForgeResult<Vec<Team>> {
        let orgs: Vec<types::User> = self
            .get_all(
                &user.access_token,
                format!("{}/user/orgs?limit={PAGE_SIZE}", self.api),
            )
            .await?;
        Ok(orgs
            .into_iter()
            .map(|o| Team {
                login: o.name().to_string(),
                avatar: expand_or_raw(&self.url, &o.avatar_url),
            })
            .collect())
    }

    async fn repo(&self, user: &User, lookup: &RepoLookup) -> ForgeResult<Repo> {
        let url = match lookup {
            RepoLookup::RemoteId(id) => format!("{}/repositories/{id}", self.api),
            RepoLookup::Name { owner, name } => format!("{}/repos/{owner}/{name}", self.api),
        };
        let repo: types::Repository = self.get(&user.access_token, url).await?;
        Ok(parse::convert_repo(&repo))
    }

    async fn repos(&self, user: &User) -> ForgeResult<Vec<Repo>> {
        let repos: Vec<types::Repository> = self
            .get_all(
                &user.access_token,
                format!("{}/user/repos?limit={PAGE_SIZE}", self.api),
            )
            .await?;
        Ok(repos
            .iter()
            .filter(|r| !r.archived)
            .map(parse::convert_repo)
            .collect())
    }

    #[instrument(skip(self, user, pipeline), fields(repo = %repo.full_name))]
    async fn file(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<u8>> {
        let url = self.repo_url(
            repo,
            &format!(
                "raw/{}?ref={}",
                path.trim_start_matches('/'),
                encode_segment(revision(pipeline))
            ),
        );
        let resp = self
            .transport
            .send(ApiRequest::get(url).with_bearer(&user.access_token))
            .await?
            .error_for_status()?;
        Ok(resp.body)
    }

    #[instrument(skip(self, user, pipeline), fields(repo = %repo.full_name))]
    async fn dir(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<FileBlob>> {
        let prefix = dir_prefix(path);
        let paths: Vec<String> = self
            .list_files(user, repo, pipeline, path)
            .await?
            .into_iter()
            .filter(|p| p.starts_with(&prefix))
            .collect();

        fetch_all_files(paths, |path| async move {
            self.file(user, repo, pipeline, &path).await
        })
        .await
    }

    async fn status(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        status: &CommitStatus,
    ) -> ForgeResult<()> {
        let body = types::NewStatus {
            state: status_state(status.state),
            target_url: &status.target_url,
            description: status.state.description(),
            context: &status.context,
        };
        let req = ApiRequest::post(self.repo_url(repo, &format!("statuses/{}", pipeline.commit)))
            .with_bearer(&user.access_token)
            .with_json(&body)?;
        self.transport.send(req).await?.error_for_status()?;
        Ok(())
    }

    fn netrc(&self, user: Option<&User>, repo: &Repo) -> ForgeResult<NetrcCredential> {
        NetrcCredential::for_clone_url(
            &repo.clone,
            user.map(|u| (u.login.clone(), u.access_token.clone())),
        )
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn activate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        self.deactivate(user, repo, link).await?;

        let hook = types::NewHook {
            kind: self.kind.as_str(),
            active: true,
            events: HOOK_EVENTS,
            config: types::NewHookConfig {
                url: link,
                content_type: "json",
            },
        };
        let req = ApiRequest::post(self.repo_url(repo, "hooks"))
            .with_bearer(&user.access_token)
            .with_json(&hook)?;
        self.transport.send(req).await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn deactivate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        let hooks: Vec<types::Hook> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, &format!("hooks?limit={PAGE_SIZE}")),
            )
            .await?;
        for hook in matching_hooks(&hooks, link, |h| h.config.url.as_str()) {
            debug!(hook_id = hook.id, "removing webhook");
            let req = ApiRequest::delete(self.repo_url(repo, &format!("hooks/{}", hook.id)))
                .with_bearer(&user.access_token);
            self.transport.send(req).await?.error_for_status()?;
        }
        Ok(())
    }

    async fn branches(&self, user: &User, repo: &Repo) -> ForgeResult<Vec<String>> {
        let branches: Vec<types::Branch> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, &format!("branches?limit={PAGE_SIZE}")),
            )
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn branch_head(&self, user: &User, repo: &Repo, branch: &str) -> ForgeResult<Commit> {
        let branch: types::Branch = self
            .get(
                &user.access_token,
                self.repo_url(repo, &format!("branches/{}", encode_segment(branch))),
            )
            .await?;
        Ok(Commit {
            sha: branch.commit.id,
            forge_url: branch.commit.url,
        })
    }

    async fn pull_request_files(
        &self,
        user: &User,
        repo: &Repo,
        index: u64,
    ) -> ForgeResult<Vec<String>> {
        let files: Vec<types::ChangedFile> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, &format!("pulls/{index}/files?limit={PAGE_SIZE}")),
            )
            .await?;
        Ok(files
            .into_iter()
            .flat_map(|f| [f.filename, f.previous_filename])
            .filter(|p| !p.is_empty())
            .collect())
    }

    fn parse_hook(&self, req: &HookRequest) -> ForgeResult<HookOutcome> {
        parse_hook(req)
    }
}

fn expand_or_raw(base: &str, avatar: &str) -> String {
    parse::expand_avatar(base, &parse::fix_malformed_avatar(avatar))
}
