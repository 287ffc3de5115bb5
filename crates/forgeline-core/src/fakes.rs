//! In-memory fakes for the forge and transport ports (testing only)
//!
//! Provides `ScriptedForge`, a [`Forge`] serving files from a list, and
//! `MockTransport`, an [`ApiTransport`] replaying canned responses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::*;
use crate::forge::*;
use crate::transport::{ApiRequest, ApiResponse, ApiTransport, HttpMethod};

// ---------------------------------------------------------------------------
// ScriptedForge
// ---------------------------------------------------------------------------

/// A forge whose repository content is a fixed list of files.
#[derive(Debug, Default)]
pub struct ScriptedForge {
    files: Vec<(String, Vec<u8>)>,
    failure: Option<ForgeError>,
    delay: Option<Duration>,
    hook_outcome: Option<HookOutcome>,
    pull_files: Vec<String>,
    file_calls: AtomicUsize,
    dir_calls: AtomicUsize,
    pull_file_calls: AtomicUsize,
}

impl ScriptedForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.to_string(), data.into()));
        self
    }

    /// Every `file` and `dir` call fails with `err`.
    pub fn failing_with(mut self, err: ForgeError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Every `file` and `dir` call sleeps first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Outcome returned by `parse_hook`.
    pub fn with_hook_outcome(mut self, outcome: HookOutcome) -> Self {
        self.hook_outcome = Some(outcome);
        self
    }

    /// Files returned by `pull_request_files`.
    pub fn with_pull_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pull_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn dir_calls(&self) -> usize {
        self.dir_calls.load(Ordering::SeqCst)
    }

    pub fn pull_file_calls(&self) -> usize {
        self.pull_file_calls.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> ForgeResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Forge for ScriptedForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Gitea
    }

    fn url(&self) -> &str {
        "https://forge.test"
    }

    async fn login(&self, _req: &LoginRequest) -> ForgeResult<LoginFlow> {
        Ok(LoginFlow::Redirect(format!("{}/login/oauth/authorize", self.url())))
    }

    async fn auth(&self, _token: &str) -> ForgeResult<String> {
        Ok("scripted".to_string())
    }

    async fn teams(&self, _user: &User) -> ForgeResult<Vec<Team>> {
        Ok(Vec::new())
    }

    async fn repo(&self, _user: &User, lookup: &RepoLookup) -> ForgeResult<Repo> {
        match lookup {
            RepoLookup::Name { owner, name } => Ok(Repo::new(owner.clone(), name.clone())),
            RepoLookup::RemoteId(id) => Err(ForgeError::NotFound(format!("repo {id}"))),
        }
    }

    async fn repos(&self, _user: &User) -> ForgeResult<Vec<Repo>> {
        Ok(Vec::new())
    }

    async fn file(
        &self,
        _user: &User,
        _repo: &Repo,
        _pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<u8>> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        self.files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| ForgeError::NotFound(path.to_string()))
    }

    async fn dir(
        &self,
        _user: &User,
        _repo: &Repo,
        _pipeline: &Pipeline,
        path: &str,
    ) -> ForgeResult<Vec<FileBlob>> {
        self.dir_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, data)| FileBlob::new(name.clone(), data.clone()))
            .collect())
    }

    async fn status(
        &self,
        _user: &User,
        _repo: &Repo,
        _pipeline: &Pipeline,
        _status: &CommitStatus,
    ) -> ForgeResult<()> {
        Ok(())
    }

    fn netrc(&self, user: Option<&User>, repo: &Repo) -> ForgeResult<NetrcCredential> {
        NetrcCredential::for_clone_url(
            &repo.clone,
            user.map(|u| (u.login.clone(), u.access_token.clone())),
        )
    }

    async fn activate(&self, _user: &User, _repo: &Repo, _link: &str) -> ForgeResult<()> {
        Ok(())
    }

    async fn deactivate(&self, _user: &User, _repo: &Repo, _link: &str) -> ForgeResult<()> {
        Ok(())
    }

    async fn branches(&self, _user: &User, _repo: &Repo) -> ForgeResult<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn branch_head(&self, _user: &User, _repo: &Repo, branch: &str) -> ForgeResult<Commit> {
        Err(ForgeError::NotFound(format!("branch {branch}")))
    }

    async fn pull_request_files(
        &self,
        _user: &User,
        _repo: &Repo,
        _index: u64,
    ) -> ForgeResult<Vec<String>> {
        self.pull_file_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pull_files.clone())
    }

    fn parse_hook(&self, _req: &HookRequest) -> ForgeResult<HookOutcome> {
        self.hook_outcome
            .clone()
            .ok_or_else(|| ForgeError::MalformedPayload("no scripted hook".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

type Reply = ForgeResult<ApiResponse>;

/// Replays canned responses keyed by method and URL.
///
/// A URL without a query string also matches requests that carry one.
/// Several replies for the same key are served in order; the last one
/// repeats. Unrouted requests get a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(HttpMethod, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: HttpMethod, url: &str, response: ApiResponse) -> Self {
        self.push_reply(method, url, Ok(response));
        self
    }

    pub fn on_json<T: serde::Serialize>(self, method: HttpMethod, url: &str, body: &T) -> Self {
        self.on(method, url, ApiResponse::json_body(200, body))
    }

    pub fn on_error(self, method: HttpMethod, url: &str, err: ForgeError) -> Self {
        self.push_reply(method, url, Err(err));
        self
    }

    fn push_reply(&self, method: HttpMethod, url: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: HttpMethod, url_prefix: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.starts_with(url_prefix))
            .collect()
    }
}

#[async_trait]
impl ApiTransport for MockTransport {
    async fn send(&self, req: ApiRequest) -> ForgeResult<ApiResponse> {
        self.requests.lock().unwrap().push(req.clone());

        let mut routes = self.routes.lock().unwrap();
        let without_query = req.url.split('?').next().unwrap_or(&req.url).to_string();
        let key = if routes.contains_key(&(req.method, req.url.clone())) {
            (req.method, req.url.clone())
        } else {
            (req.method, without_query)
        };

        match routes.get_mut(&key) {
            Some(replies) if replies.len() > 1 => replies
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::new(404, ""))),
            Some(replies) => replies
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(ApiResponse::new(404, ""))),
            None => Ok(ApiResponse::new(404, format!("no route for {}", req.url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hook_backfills_empty_pull_files() {
        let pipeline = Pipeline {
            event: EventKind::Pull,
            pull_request: Some(PullRequest {
                index: 7,
                ..Default::default()
            }),
            ..Default::default()
        };
        let forge = ScriptedForge::new()
            .with_hook_outcome(HookOutcome::matched(Repo::new("o", "r"), pipeline))
            .with_pull_files(["src/lib.rs", "src/lib.rs", "README.md"]);

        let owner = FixedOwner(Some(User::with_token("o", "t")));
        let outcome = forge.hook(&HookRequest::new("{}"), &owner).await.unwrap();
        let (_, pipeline) = outcome.into_matched().unwrap();

        assert_eq!(pipeline.changed_files.len(), 2);
        assert_eq!(forge.pull_file_calls(), 1);
    }

    #[tokio::test]
    async fn hook_skips_backfill_when_files_present() {
        let pipeline = Pipeline {
            event: EventKind::Pull,
            changed_files: ["a"].into_iter().collect(),
            pull_request: Some(PullRequest::default()),
            ..Default::default()
        };
        let forge = ScriptedForge::new()
            .with_hook_outcome(HookOutcome::matched(Repo::new("o", "r"), pipeline))
            .with_pull_files(["b"]);

        let owner = FixedOwner(Some(User::default()));
        forge.hook(&HookRequest::new("{}"), &owner).await.unwrap();
        assert_eq!(forge.pull_file_calls(), 0);
    }

    #[tokio::test]
    async fn hook_skips_backfill_for_push() {
        let forge = ScriptedForge::new()
            .with_hook_outcome(HookOutcome::matched(Repo::new("o", "r"), Pipeline::default()))
            .with_pull_files(["b"]);

        forge
            .hook(&HookRequest::new("{}"), &FixedOwner(Some(User::default())))
            .await
            .unwrap();
        assert_eq!(forge.pull_file_calls(), 0);
    }

    #[tokio::test]
    async fn mock_transport_serves_replies_in_order() {
        let transport = MockTransport::new()
            .on(HttpMethod::Get, "https://api.test/x", ApiResponse::new(500, ""))
            .on(HttpMethod::Get, "https://api.test/x", ApiResponse::new(200, "ok"));

        let first = transport.send(ApiRequest::get("https://api.test/x?page=1")).await.unwrap();
        let second = transport.send(ApiRequest::get("https://api.test/x")).await.unwrap();
        let third = transport.send(ApiRequest::get("https://api.test/x")).await.unwrap();
        assert_eq!((first.status, second.status, third.status), (500, 200, 200));

        let missing = transport.send(ApiRequest::get("https://api.test/y")).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(transport.requests().len(), 4);
    }
}
