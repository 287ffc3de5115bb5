//! Secret services.
//!
//! A repo either delegates to its own signed HTTP endpoint or uses the
//! built-in store. There is no fallback between the two.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use forgeline_core::{Pipeline, Repo};
use forgeline_state::{Scope, Secret, SecretStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{ExtensionClient, ExtensionReply};
use crate::Result;

#[async_trait]
pub trait SecretService: Send + Sync {
    /// Secrets exposed to `pipeline`, one per name, sorted by name.
    async fn secret_list_pipeline(&self, repo: &Repo, pipeline: &Pipeline) -> Result<Vec<Secret>>;

    /// The secret `name` visible to `repo`, if any.
    async fn secret_find(&self, repo: &Repo, name: &str) -> Result<Option<Secret>>;
}

/// Scopes visible to a repo, most specific first.
pub(crate) fn scopes_for(repo: &Repo) -> Vec<Scope> {
    let mut scopes = vec![Scope::Repo(repo.full_name.clone())];
    if !repo.owner.is_empty() {
        scopes.push(Scope::Org(repo.owner.clone()));
    }
    scopes.push(Scope::Global);
    scopes
}

// ---------------------------------------------------------------------------
// Built-in
// ---------------------------------------------------------------------------

/// Store-backed secrets with repo > org > global precedence.
pub struct BuiltinSecretService {
    store: Arc<dyn SecretStore>,
}

impl BuiltinSecretService {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretService for BuiltinSecretService {
    #[instrument(skip_all, fields(repo = %repo.full_name, event = %pipeline.event))]
    async fn secret_list_pipeline(&self, repo: &Repo, pipeline: &Pipeline) -> Result<Vec<Secret>> {
        let mut by_name: BTreeMap<String, Secret> = BTreeMap::new();
        for scope in scopes_for(repo) {
            for secret in self.store.secret_list(&scope).await? {
                by_name.entry(secret.name.clone()).or_insert(secret);
            }
        }

        // A restricted repo secret still shadows a broader one of the same name.
        let event = pipeline.event.as_str();
        let secrets: Vec<Secret> = by_name
            .into_values()
            .filter(|s| s.matches_event(event))
            .collect();
        debug!(count = secrets.len(), "secrets resolved");
        Ok(secrets)
    }

    async fn secret_find(&self, repo: &Repo, name: &str) -> Result<Option<Secret>> {
        for scope in scopes_for(repo) {
            if let Some(secret) = self.store.secret_find(&scope, name).await? {
                return Ok(Some(secret));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// A secret on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl SecretEntry {
    fn into_secret(self, repo: &Repo) -> Secret {
        Secret::new(Scope::Repo(repo.full_name.clone()), self.name, self.value)
            .with_images(self.images)
            .with_events(self.events)
    }
}

#[derive(Debug, Serialize)]
struct SecretRequest<'a> {
    repo: &'a Repo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<&'a Pipeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    secrets: Vec<SecretEntry>,
}

/// Secrets served by a signed HTTP extension. `204` means none.
pub struct HttpSecretService {
    client: ExtensionClient,
    endpoint: String,
}

impl HttpSecretService {
    pub fn new(client: ExtensionClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn request(&self, body: &SecretRequest<'_>) -> Result<Vec<SecretEntry>> {
        let reply = self
            .client
            .send::<_, SecretResponse>(&self.endpoint, body)
            .await?;
        Ok(match reply {
            ExtensionReply::Replaced(resp) => resp.secrets,
            ExtensionReply::Unchanged => Vec::new(),
        })
    }
}

#[async_trait]
impl SecretService for HttpSecretService {
    #[instrument(skip_all, fields(repo = %repo.full_name, endpoint = %self.endpoint))]
    async fn secret_list_pipeline(&self, repo: &Repo, pipeline: &Pipeline) -> Result<Vec<Secret>> {
        let entries = self
            .request(&SecretRequest {
                repo,
                pipeline: Some(pipeline),
                name: None,
            })
            .await?;
        Ok(entries.into_iter().map(|e| e.into_secret(repo)).collect())
    }

    async fn secret_find(&self, repo: &Repo, name: &str) -> Result<Option<Secret>> {
        let entries = self
            .request(&SecretRequest {
                repo,
                pipeline: None,
                name: Some(name),
            })
            .await?;
        Ok(entries
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.into_secret(repo)))
    }
}
