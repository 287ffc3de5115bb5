//! Bitbucket Cloud.

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

use crate::common::{dir_prefix, encode_segment, fetch_all_files, revision};
use crate::ForgeOptions;

pub use parse::{parse_hook, EVENT_HEADER};

const DEFAULT_URL: &str = "https://bitbucket.org";
const DEFAULT_API: &str = "https://api.bitbucket.org/2.0";
const HOOK_DESCRIPTION: &str = "forgeline";
const HOOK_EVENTS: &[&str] = &[
    "repo:push",
    "pullrequest:created",
    "pullrequest:updated",
    "pullrequest:fulfilled",
    "pullrequest:rejected",
    "pullrequest:approved",
    "pullrequest:unapproved",
];

/// Bitbucket Cloud adapter.
pub struct Bitbucket {
    url: String,
    api: String,
    options: ForgeOptions,
    transport: Arc<dyn ApiTransport>,
}

impl Bitbucket {
    pub fn new(options: ForgeOptions, transport: Arc<dyn ApiTransport>) -> Self {
        let url = options.web_url(DEFAULT_URL);
        let api = options.api_base(DEFAULT_API.to_string());
        Self {
            url,
            api,
            options,
            transport,
        }
    }

    fn repo_url(&self, repo: &Repo, rest: &str) -> String {
        format!("{}/repositories/{}/{rest}", self.api, repo.full_name)
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<T> {
        self.transport
            .send(ApiRequest::get(url).with_bearer(token))
            .await?
            .json()
    }

    /// Follow the `next` link of Bitbucket's page envelope.
    async fn get_all<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: types::Page<T> = self.get(token, url.clone()).await?;
            items.extend(page.values);
            next = page.next.filter(|n| *n != url);
        }
        Ok(items)
    }

    /// Every file below `path`, following sub-directories.
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
            let entries: Vec<types::SrcEntry> = self
                .get_all(
                    &user.access_token,
                    self.repo_url(repo, &format!("src/{rev}/{dir}/?pagelen=100")),
                )
                .await?;
            for entry in entries {
                match entry.kind.as_str() {
                    "commit_file" => files.push(entry.path),
                    "commit_directory" => pending.push(entry.path),
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
        StatusState::Pending | StatusState::Running => "INPROGRESS",
        StatusState::Success | StatusState::Skipped => "SUCCESSFUL",
        StatusState::Failure | StatusState::Error => "FAILED",
        StatusState::Killed => "STOPPED",
    }
}

#[async_trait]
impl Forge for Bitbucket {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Bitbucket
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, req))]
    async fn login(&self, req: &LoginRequest) -> ForgeResult<LoginFlow> {
        if let Some(error) = &req.error {
            let description = req.error_description.clone().unwrap_or_default();
            return Err(ForgeError::Unauthorized(format!("{error}: {description}")));
        }

        let Some(code) = req.code.as_deref().filter(|c| !c.is_empty()) else {
            let mut redirect = url::Url::parse(&format!("{}/site/oauth2/authorize", self.url))
                .map_err(|e| ForgeError::Unsupported(format!("forge url: {e}")))?;
            redirect
                .query_pairs_mut()
                .append_pair("client_id", &self.options.client_id)
                .append_pair("response_type", "code")
                .append_pair("state", req.state.as_deref().unwrap_or_default());
            return Ok(LoginFlow::Redirect(redirect.into()));
        };

        let token: types::AccessToken = self
            .transport
            .send(
                ApiRequest::post(format!("{}/site/oauth2/access_token", self.url))
                    .with_basic(&self.options.client_id, &self.options.client_secret)
                    .with_form(&[("grant_type", "authorization_code"), ("code", code)]),
            )
            .await?
            .json()?;

        let account: types::Account = self
            .get(&token.access_token, format!("{}/user", self.api))
            .await?;
        Ok(LoginFlow::Authenticated(User {
            login: account.login().to_string(),
            avatar: account.links.avatar(),
            forge_remote_id: account.uuid.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: if token.expires_in > 0 {
                chrono::Utc::now().timestamp() + token.expires_in
            } else {
                0
            },
            ..Default::default()
        }))
    }

    async fn auth(&self, token: &str) -> ForgeResult<String> {
        let account: types::Account = self.get(token, format!("{}/user", self.api)).await?;
        Ok(account.login().to_string())
    }

    async fn teams(&self, user: &User) -> ForgeResult<Vec<Team>> {
        let workspaces: Vec<types::Workspace> = self
            .get_all(
                &user.access_token,
                format!("{}/workspaces?role=member&pagelen=100", self.api),
            )
            .await?;
        Ok(workspaces
            .into_iter()
            .map(|w| Team {
                avatar: w.links.avatar(),
                login: w.slug,
            })
            .collect())
    }

    async fn repo(&self, user: &User, lookup: &RepoLookup) -> ForgeResult<Repo> {
        let url = match lookup {
            // `{}` stands in for the workspace when addressing a repository by UUID.
            RepoLookup::RemoteId(uuid) => {
                format!("{}/repositories/%7B%7D/{}", self.api, encode_segment(uuid))
            }
            RepoLookup::Name { owner, name } => {
                format!("{}/repositories/{owner}/{name}", self.api)
            }
        };
        let repo: types::Repository = self.get(&user.access_token, url).await?;
        Ok(parse::convert_repo(&repo))
    }

    async fn repos(&self, user: &User) -> ForgeResult<Vec<Repo>> {
        let repos: Vec<types::Repository> = self
            .get_all(
                &user.access_token,
                format!("{}/repositories?role=member&pagelen=100", self.api),
            )
            .await?;
        Ok(repos.iter().map(parse::convert_repo).collect())
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
                "src/{}/{}",
                encode_segment(revision(pipeline)),
                path.trim_start_matches('/')
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
            key: &status.context,
            name: &status.context,
            url: &status.target_url,
            description: status.state.description(),
        };
        let req = ApiRequest::post(self.repo_url(
            repo,
            &format!("commit/{}/statuses/build", pipeline.commit),
        ))
        .with_bearer(&user.access_token)
        .with_json(&body)?;
        self.transport.send(req).await?.error_for_status()?;
        Ok(())
    }

    fn netrc(&self, user: Option<&User>, repo: &Repo) -> ForgeResult<NetrcCredential> {
        NetrcCredential::for_clone_url(
            &repo.clone,
            user.map(|u| ("x-token-auth".to_string(), u.access_token.clone())),
        )
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn activate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        self.deactivate(user, repo, link).await?;

        let hook = types::NewHook {
            description: HOOK_DESCRIPTION,
            url: link,
            active: true,
            events: HOOK_EVENTS,
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
            .get_all(&user.access_token, self.repo_url(repo, "hooks?pagelen=100"))
            .await?;
        for hook in matching_hooks(&hooks, link, |h| h.url.as_str()) {
            debug!(hook_id = %hook.uuid, "removing webhook");
            let req = ApiRequest::delete(
                self.repo_url(repo, &format!("hooks/{}", encode_segment(&hook.uuid))),
            )
            .with_bearer(&user.access_token);
            self.transport.send(req).await?.error_for_status()?;
        }
        Ok(())
    }

    async fn branches(&self, user: &User, repo: &Repo) -> ForgeResult<Vec<String>> {
        let branches: Vec<types::BranchRef> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, "refs/branches?pagelen=100"),
            )
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn branch_head(&self, user: &User, repo: &Repo, branch: &str) -> ForgeResult<Commit> {
        let branch: types::BranchRef = self
            .get(
                &user.access_token,
                self.repo_url(repo, &format!("refs/branches/{}", encode_segment(branch))),
            )
            .await?;
        Ok(Commit {
            forge_url: branch.target.links.html(),
            sha: branch.target.hash,
        })
    }

    async fn pull_request_files(
        &self,
        user: &User,
        repo: &Repo,
        index: u64,
    ) -> ForgeResult<Vec<String>> {
        let stats: Vec<types::DiffStat> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, &format!("pullrequests/{index}/diffstat?pagelen=100")),
            )
            .await?;
        Ok(stats
            .into_iter()
            .flat_map(|s| s.new.into_iter().chain(s.old).map(|p| p.path))
            .filter(|p| !p.is_empty())
            .collect())
    }

    fn parse_hook(&self, req: &HookRequest) -> ForgeResult<HookOutcome> {
        parse_hook(req)
    }
}
