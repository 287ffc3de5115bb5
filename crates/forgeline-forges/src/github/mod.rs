//! GitHub and GitHub Enterprise.

mod parse;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use forgeline_core::forge::matching_hooks;
use forgeline_core::transport::{ApiRequest, ApiTransport};
use forgeline_core::{
    Commit, CommitStatus, FileBlob, Forge, ForgeError, ForgeKind, ForgeResult, HookOutcome,
    HookRequest, LoginFlow, LoginRequest, NetrcCredential, Pipeline, Repo, RepoLookup,
    StatusState, Team, User,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::common::{
    dir_prefix, encode_path, encode_segment, fetch_all_files, get_all_linked, revision,
};
use crate::ForgeOptions;

pub use parse::{parse_hook, EVENT_HEADER};

const DEFAULT_URL: &str = "https://github.com";
const DEFAULT_API: &str = "https://api.github.com";
const OAUTH_SCOPE: &str = "repo repo:status user:email read:org";
const HOOK_EVENTS: &[&str] = &[
    "push",
    "pull_request",
    "pull_request_review",
    "deployment",
    "release",
];

/// GitHub adapter.
pub struct Github {
    url: String,
    api: String,
    options: ForgeOptions,
    transport: Arc<dyn ApiTransport>,
}

impl Github {
    pub fn new(options: ForgeOptions, transport: Arc<dyn ApiTransport>) -> Self {
        let url = options.web_url(DEFAULT_URL);
        let derived = if url == DEFAULT_URL {
            DEFAULT_API.to_string()
        } else {
            format!("{url}/api/v3")
        };
        let api = options.api_base(derived);
        Self {
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
            .send(
                ApiRequest::get(url)
                    .with_bearer(token)
                    .with_header("Accept", "application/vnd.github+json"),
            )
            .await?
            .json()
    }

    async fn get_all<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<Vec<T>> {
        get_all_linked(self.transport.as_ref(), url, |req| {
            req.with_bearer(token)
                .with_header("Accept", "application/vnd.github+json")
        })
        .await
    }

    fn contents_url(&self, repo: &Repo, path: &str, pipeline: &Pipeline) -> String {
        self.repo_url(
            repo,
            &format!(
                "contents/{}?ref={}",
                encode_path(path.trim_matches('/')),
                encode_segment(revision(pipeline))
            ),
        )
    }

    /// Walk the contents API below `path`. Used when the recursive tree is truncated.
    async fn walk_contents(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<String>> {
        let mut pending = vec![path.trim_matches('/').to_string()];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let url = self.contents_url(repo, &dir, pipeline);
            let listing = self.get::<Vec<types::ContentEntry>>(&user.access_token, url);
            let entries = match listing.await {
                Ok(entries) => entries,
                Err(err) if err.is_not_found() && dir == path.trim_matches('/') => Vec::new(),
                Err(err) => return Err(err),
            };
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

    async fn hooks(&self, user: &User, repo: &Repo) -> ForgeResult<Vec<types::Hook>> {
        self.get_all(&user.access_token, self.repo_url(repo, "hooks?per_page=100"))
            .await
    }
}

/// GitHub only knows four commit states.
fn status_state(state: StatusState) -> &'static str {
    match state {
        StatusState::Pending | StatusState::Running => "pending",
        StatusState::Success | StatusState::Skipped => "success",
        StatusState::Failure => "failure",
        StatusState::Killed | StatusState::Error => "error",
    }
}

fn convert_user(from: types::User, token: types::AccessToken) -> User {
    User {
        login: from.login,
        email: from.email.unwrap_or_default(),
        avatar: from.avatar_url,
        forge_remote_id: from.id.to_string(),
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expiry: if token.expires_in > 0 {
            chrono::Utc::now().timestamp() + token.expires_in
        } else {
            0
        },
    }
}

#[async_trait]
impl Forge for Github {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Github
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
            let mut redirect = url::Url::parse(&format!("{}/login/oauth/authorize", self.url))
                .map_err(|e| ForgeError::Unsupported(format!("forge url: {e}")))?;
            redirect
                .query_pairs_mut()
                .append_pair("client_id", &self.options.client_id)
                .append_pair("redirect_uri", &self.options.redirect_url)
                .append_pair("scope", OAUTH_SCOPE)
                .append_pair("state", req.state.as_deref().unwrap_or_default());
            return Ok(LoginFlow::Redirect(redirect.into()));
        };

        let token: types::AccessToken = self
            .transport
            .send(
                ApiRequest::post(format!("{}/login/oauth/access_token", self.url))
                    .with_header("Accept", "application/json")
                    .with_form(&[
                        ("client_id", self.options.client_id.as_str()),
                        ("client_secret", self.options.client_secret.as_str()),
                        ("code", code),
                        ("redirect_uri", self.options.redirect_url.as_str()),
                    ]),
            )
            .await?
            .json()?;
        if let Some(error) = token.error.clone() {
            let description = token.error_description.clone().unwrap_or_default();
            return Err(ForgeError::Unauthorized(format!("{error}: {description}")));
        }

        let account: types::User = self
            .get(&token.access_token, format!("{}/user", self.api))
            .await?;
        Ok(LoginFlow::Authenticated(convert_user(account, token)))
    }

    async fn auth(&self, token: &str) -> ForgeResult<String> {
        let account: types::User = self.get(token, format!("{}/user", self.api)).await?;
        Ok(account.login)
    }

    async fn teams(&self, user: &User) -> ForgeResult<Vec<Team>> {
        let orgs: Vec<types::Org> = self
            .get_all(
                &user.access_token,
                format!("{}/user/orgs?per_page=100", self.api),
            )
            .await?;
        Ok(orgs
            .into_iter()
            .map(|o| Team {
                login: o.login,
                avatar: o.avatar_url,
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
                format!("{}/user/repos?per_page=100", self.api),
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
        let url = self.contents_url(repo, path, pipeline);
        let content: types::Content = self.get(&user.access_token, url).await?;
        if content.kind != "file" {
            return Err(ForgeError::NotFound(format!("{path} is a {}", content.kind)));
        }
        let cleaned: String = content
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| ForgeError::MalformedPayload(format!("content of {path}: {e}")))
    }

    #[instrument(skip(self, user, pipeline), fields(repo = %repo.full_name))]
    async fn dir(
        &self,
        user: &User,
        repo: &Repo,
        pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<FileBlob>> {
        let url = self.repo_url(
            repo,
            &format!("git/trees/{}?recursive=1", revision(pipeline)),
        );
        let tree: types::Tree = self.get(&user.access_token, url).await?;

        let prefix = dir_prefix(path);
        let paths: Vec<String> = if tree.truncated {
            debug!(path, "tree listing was truncated, walking contents");
            self.walk_contents(user, repo, pipeline, path).await?
        } else {
            tree.tree
                .into_iter()
                .filter(|e| e.kind == "blob" && e.path.starts_with(&prefix))
                .map(|e| e.path)
                .collect()
        };

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
            user.map(|u| (u.access_token.clone(), "x-oauth-basic".to_string())),
        )
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn activate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        self.deactivate(user, repo, link).await?;

        let hook = types::NewHook {
            name: "web",
            active: true,
            events: HOOK_EVENTS,
            config: types::NewHookConfig {
                url: link,
                content_type: "form",
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
        let hooks = self.hooks(user, repo).await?;
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
            .get_all(&user.access_token, self.repo_url(repo, "branches?per_page=100"))
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn branch_head(&self, user: &User, repo: &Repo, branch: &str) -> ForgeResult<Commit> {
        let commit: types::CommitRef = self
            .get(
                &user.access_token,
                self.repo_url(repo, &format!("commits/{branch}")),
            )
            .await?;
        Ok(Commit {
            sha: commit.sha,
            forge_url: commit.html_url,
        })
    }

    async fn pull_request_files(
        &self,
        user: &User,
        repo: &Repo,
        index: u64,
    ) -> ForgeResult<Vec<String>> {
        let files: Vec<types::PullFile> = self
            .get_all(
                &user.access_token,
                self.repo_url(repo, &format!("pulls/{index}/files?per_page=100")),
            )
            .await?;
        Ok(files
            .into_iter()
            .flat_map(|f| std::iter::once(f.filename).chain(f.previous_filename))
            .collect())
    }

    fn parse_hook(&self, req: &HookRequest) -> ForgeResult<HookOutcome> {
        parse_hook(req, self.options.merge_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_core::fakes::MockTransport;

    #[test]
    fn enterprise_api_is_derived() {
        let transport = Arc::new(MockTransport::new());
        let forge = Github::new(ForgeOptions::new("https://git.corp.example/"), transport);
        assert_eq!(forge.url(), "https://git.corp.example");
        assert_eq!(forge.api, "https://git.corp.example/api/v3");
    }

    #[test]
    fn states_collapse() {
        assert_eq!(status_state(StatusState::Running), "pending");
        assert_eq!(status_state(StatusState::Skipped), "success");
        assert_eq!(status_state(StatusState::Killed), "error");
    }

    #[tokio::test]
    async fn login_without_code_redirects() {
        let transport = Arc::new(MockTransport::new());
        let forge = Github::new(
            ForgeOptions::default()
                .with_oauth("client", "secret")
                .with_redirect_url("https://ci.example.com/authorize"),
            transport,
        );
        let flow = forge
            .login(&LoginRequest {
                state: Some("xyz".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        match flow {
            LoginFlow::Redirect(url) => {
                assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
                assert!(url.contains("client_id=client"));
                assert!(url.contains("state=xyz"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_error_is_unauthorized() {
        let forge = Github::new(ForgeOptions::default(), Arc::new(MockTransport::new()));
        let err = forge
            .login(&LoginRequest {
                error: Some("access_denied".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Unauthorized(_)));
    }
}
