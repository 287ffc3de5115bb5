//! Registry credential services.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use forgeline_core::Repo;
use forgeline_state::{Registry, RegistryStore, Scope};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::client::{ExtensionClient, ExtensionReply};
use crate::Result;

#[async_trait]
pub trait RegistryService: Send + Sync {
    /// Registries usable by `repo`, one per address.
    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>>;

    async fn registry_find(&self, repo: &Repo, address: &str) -> Result<Option<Registry>>;
}

fn repo_then_global(repo: &Repo) -> [Scope; 2] {
    [Scope::Repo(repo.full_name.clone()), Scope::Global]
}

/// Store-backed registries; a repo entry shadows a global one for the same address.
pub struct BuiltinRegistryService {
    store: Arc<dyn RegistryStore>,
}

impl BuiltinRegistryService {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RegistryService for BuiltinRegistryService {
    #[instrument(skip_all, fields(repo = %repo.full_name))]
    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>> {
        let mut by_address: BTreeMap<String, Registry> = BTreeMap::new();
        for scope in repo_then_global(repo) {
            for registry in self.store.registry_list(&scope).await? {
                by_address.entry(registry.address.clone()).or_insert(registry);
            }
        }
        debug!(count = by_address.len(), "registries resolved");
        Ok(by_address.into_values().collect())
    }

    async fn registry_find(&self, repo: &Repo, address: &str) -> Result<Option<Registry>> {
        for scope in repo_then_global(repo) {
            if let Some(registry) = self.store.registry_find(&scope, address).await? {
                return Ok(Some(registry));
            }
        }
        Ok(None)
    }
}

/// A registry on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
struct RegistryRequest<'a> {
    repo: &'a Repo,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    #[serde(default)]
    registries: Vec<RegistryEntry>,
}

/// Registries served by a signed HTTP extension. `204` means none.
pub struct HttpRegistryService {
    client: ExtensionClient,
    endpoint: String,
}

impl HttpRegistryService {
    pub fn new(client: ExtensionClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn request(&self, repo: &Repo, address: Option<&str>) -> Result<Vec<Registry>> {
        let reply = self
            .client
            .send::<_, RegistryResponse>(&self.endpoint, &RegistryRequest { repo, address })
            .await?;
        let entries = match reply {
            ExtensionReply::Replaced(resp) => resp.registries,
            ExtensionReply::Unchanged => Vec::new(),
        };

        let scope = Scope::Repo(repo.full_name.clone());
        Ok(entries
            .into_iter()
            .map(|e| Registry::new(scope.clone(), e.address, e.username, e.password))
            .collect())
    }
}

#[async_trait]
impl RegistryService for HttpRegistryService {
    #[instrument(skip_all, fields(repo = %repo.full_name, endpoint = %self.endpoint))]
    async fn registry_list(&self, repo: &Repo) -> Result<Vec<Registry>> {
        self.request(repo, None).await
    }

    async fn registry_find(&self, repo: &Repo, address: &str) -> Result<Option<Registry>> {
        Ok(self
            .request(repo, Some(address))
            .await?
            .into_iter()
            .find(|r| r.address == address))
    }
}
