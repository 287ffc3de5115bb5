//! GitLab.com and self-managed GitLab.

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

const DEFAULT_URL: &str = "https://gitlab.com";
const OAUTH_SCOPE: &str = "api";

/// GitLab adapter.
pub struct Gitlab {
    url: String,
    api: String,
    options: ForgeOptions,
    transport: Arc<dyn ApiTransport>,
}

impl Gitlab {
    pub fn new(options: ForgeOptions, transport: Arc<dyn ApiTransport>) -> Self {
        let url = options.web_url(DEFAULT_URL);
        let api = options.api_base(format!("{url}/api/v4"));
        Self {
            url,
            api,
            options,
            transport,
        }
    }

    /// Numeric project id when known, else the URL-encoded path.
    fn project_url(&self, repo: &Repo, rest: &str) -> String {
        let id = if repo.forge_remote_id.is_empty() {
            encode_segment(&repo.full_name)
        } else {
            repo.forge_remote_id.clone()
        };
        format!("{}/projects/{id}/{rest}", self.api)
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<T> {
        self.transport
            .send(ApiRequest::get(url).with_bearer(token))
            .await?
            .json()
    }

    /// Follow `X-Next-Page` until it comes back empty.
    async fn get_all<T: DeserializeOwned>(&self, token: &str, url: String) -> ForgeResult<Vec<T>> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = String::from("1");
        loop {
            let resp = self
                .transport
                .send(ApiRequest::get(format!("{url}{separator}page={page}")).with_bearer(token))
                .await?
                .error_for_status()?;
            let next = resp
                .header("x-next-page")
                .map(str::trim)
                .filter(|p| !p.is_empty() && *p != page)
                .map(str::to_string);
            let batch: Vec<T> = resp.json()?;
            items.extend(batch);

            match next {
                Some(next) => page = next,
                None => break,
            }
        }
        Ok(items)
    }
}

fn status_state(state: StatusState) -> &'static str {
    match state {
        StatusState::Pending => "pending",
        StatusState::Running => "running",
        StatusState::Success => "success",
        StatusState::Failure | StatusState::Error => "failed",
        StatusState::Killed => "canceled",
        StatusState::Skipped => "skipped",
    }
}

/// The hook secret travels as the `access_token` query parameter of the link.
fn hook_token(link: &str) -> String {
    url::Url::parse(link)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "access_token")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default()
}

#[async_trait]
impl Forge for Gitlab {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Gitlab
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
            let mut redirect = url::Url::parse(&format!("{}/oauth/authorize", self.url))
                .map_err(|e| ForgeError::Unsupported(format!("forge url: {e}")))?;
            redirect
                .query_pairs_mut()
                .append_pair("client_id", &self.options.client_id)
                .append_pair("redirect_uri", &self.options.redirect_url)
                .append_pair("response_type", "code")
                .append_pair("scope", OAUTH_SCOPE)
                .append_pair("state", req.state.as_deref().unwrap_or_default());
            return Ok(LoginFlow::Redirect(redirect.into()));
        };

        let token: types::AccessToken = self
            .transport
            .send(ApiRequest::post(format!("{}/oauth/token", self.url)).with_form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.options.client_id.as_str()),
                ("client_secret", self.options.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.options.redirect_url.as_str()),
            ]))
            .await?
            .json()?;

        let account: types::ApiUser = self
            .get(&token.access_token, format!("{}/user", self.api))
            .await?;
        Ok(LoginFlow::Authenticated(User {
            login: account.username,
            email: account.email,
            avatar: account.avatar_url,
            forge_remote_id: account.id.to_string(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: if token.expires_in > 0 {
                token.created_at + token.expires_in
            } else {
                0
            },
        }))
    }

    async fn auth(&self, token: &str) -> ForgeResult<String> {
        let account: types::ApiUser = self.get(token, format!("{}/user", self.api)).await?;
        Ok(account.username)
    }

    async fn teams(&self, user: &User) -> ForgeResult<Vec<Team>> {
        let groups: Vec<types::Group> = self
            .get_all(
                &user.access_token,
                format!("{}/groups?per_page=100", self.api),
            )
            .await?;
        Ok(groups
            .into_iter()
            .map(|g| Team {
                login: g.full_path,
                avatar: g.avatar_url.unwrap_or_default(),
            })
            .collect())
    }

    async fn repo(&self, user: &User, lookup: &RepoLookup) -> ForgeResult<Repo> {
        let id = match lookup {
            RepoLookup::RemoteId(id) => id.clone(),
            RepoLookup::Name { owner, name } => encode_segment(&format!("{owner}/{name}")),
        };
        let project: types::Project = self
            .get(&user.access_token, format!("{}/projects/{id}", self.api))
            .await?;
        Ok(parse::convert_repo(&project))
    }

    async fn repos(&self, user: &User) -> ForgeResult<Vec<Repo>> {
        let projects: Vec<types::Project> = self
            .get_all(
                &user.access_token,
                format!("{}/projects?membership=true&per_page=100", self.api),
            )
            .await?;
        Ok(projects
            .iter()
            .filter(|p| !p.archived)
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
        let url = self.project_url(
            repo,
            &format!(
                "repository/files/{}/raw?ref={}",
                encode_segment(path.trim_start_matches('/')),
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
        let url = self.project_url(
            repo,
            &format!(
                "repository/tree?path={}&ref={}&recursive=true&per_page=100",
                encode_segment(prefix.trim_end_matches('/')),
                encode_segment(revision(pipeline))
            ),
        );
        let entries: Vec<types::TreeEntry> = self.get_all(&user.access_token, url).await?;
        let paths: Vec<String> = entries
            .into_iter()
            .filter(|e| e.kind == "blob" && e.path.starts_with(&prefix))
            .map(|e| e.path)
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
            name: &status.context,
        };
        let req = ApiRequest::post(self.project_url(repo, &format!("statuses/{}", pipeline.commit)))
            .with_bearer(&user.access_token)
            .with_json(&body)?;
        self.transport.send(req).await?.error_for_status()?;
        Ok(())
    }

    fn netrc(&self, user: Option<&User>, repo: &Repo) -> ForgeResult<NetrcCredential> {
        NetrcCredential::for_clone_url(
            &repo.clone,
            user.map(|u| ("oauth2".to_string(), u.access_token.clone())),
        )
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn activate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        self.deactivate(user, repo, link).await?;

        let token = hook_token(link);
        let hook = types::NewHook {
            url: link,
            token: &token,
            push_events: true,
            tag_push_events: true,
            merge_requests_events: true,
            releases_events: true,
            deployment_events: true,
            enable_ssl_verification: !self.options.skip_verify,
        };
        let req = ApiRequest::post(self.project_url(repo, "hooks"))
            .with_bearer(&user.access_token)
            .with_json(&hook)?;
        self.transport.send(req).await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self, user), fields(repo = %repo.full_name))]
    async fn deactivate(&self, user: &User, repo: &Repo, link: &str) -> ForgeResult<()> {
        let hooks: Vec<types::ProjectHook> = self
            .get_all(&user.access_token, self.project_url(repo, "hooks?per_page=100"))
            .await?;
        for hook in matching_hooks(&hooks, link, |h| h.url.as_str()) {
            debug!(hook_id = hook.id, "removing webhook");
            let req = ApiRequest::delete(self.project_url(repo, &format!("hooks/{}", hook.id)))
                .with_bearer(&user.access_token);
            self.transport.send(req).await?.error_for_status()?;
        }
        Ok(())
    }

    async fn branches(&self, user: &User, repo: &Repo) -> ForgeResult<Vec<String>> {
        let branches: Vec<types::Branch> = self
            .get_all(
                &user.access_token,
                self.project_url(repo, "repository/branches?per_page=100"),
            )
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn branch_head(&self, user: &User, repo: &Repo, branch: &str) -> ForgeResult<Commit> {
        let branch: types::Branch = self
            .get(
                &user.access_token,
                self.project_url(
                    repo,
                    &format!("repository/branches/{}", encode_segment(branch)),
                ),
            )
            .await?;
        Ok(Commit {
            sha: branch.commit.id,
            forge_url: branch.commit.web_url,
        })
    }

    async fn pull_request_files(
        &self,
        user: &User,
        repo: &Repo,
        index: u64,
    ) -> ForgeResult<Vec<String>> {
        let diffs: Vec<types::MergeRequestDiff> = self
            .get_all(
                &user.access_token,
                self.project_url(repo, &format!("merge_requests/{index}/diffs?per_page=100")),
            )
            .await?;
        Ok(diffs
            .into_iter()
            .flat_map(|d| {
                let renamed = (d.old_path != d.new_path).then_some(d.old_path);
                std::iter::once(d.new_path).chain(renamed)
            })
            .collect())
    }

    fn parse_hook(&self, req: &HookRequest) -> ForgeResult<HookOutcome> {
        parse_hook(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeline_core::fakes::MockTransport;

    #[test]
    fn project_url_prefers_remote_id() {
        let forge = Gitlab::new(ForgeOptions::default(), Arc::new(MockTransport::new()));
        let mut repo = Repo::new("group/sub", "project");
        assert_eq!(
            forge.project_url(&repo, "hooks"),
            "https://gitlab.com/api/v4/projects/group%2Fsub%2Fproject/hooks"
        );
        repo.forge_remote_id = "42".into();
        assert_eq!(
            forge.project_url(&repo, "hooks"),
            "https://gitlab.com/api/v4/projects/42/hooks"
        );
    }

    #[test]
    fn hook_token_is_read_from_link() {
        assert_eq!(
            hook_token("https://ci.example.com/api/hook?access_token=abc"),
            "abc"
        );
        assert_eq!(hook_token("https://ci.example.com/api/hook"), "");
    }

    #[test]
    fn states() {
        assert_eq!(status_state(StatusState::Killed), "canceled");
        assert_eq!(status_state(StatusState::Error), "failed");
    }
}
