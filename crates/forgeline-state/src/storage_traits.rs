//! Storage trait definitions for Forgeline
//!
//! These traits define the persisted state the integration layer needs:
//! - `ServerConfigStore`: process-wide key/value settings (signing key)
//! - `SecretStore`: built-in secrets scoped to a repo, an org or the server
//! - `RegistryStore`: built-in container registry credentials
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ServerConfigStore: process-wide settings
// ---------------------------------------------------------------------------

/// Key/value store for server-wide settings.
///
/// Guarantees:
/// - `get(key)` returns `StorageError::NotFound` if the key was never written.
/// - `insert_if_absent` is atomic: when several callers race on the same key,
///   exactly one value is stored and every caller receives that value.
#[async_trait]
pub trait ServerConfigStore: Send + Sync {
    /// Read a value. Returns `StorageError::NotFound` if absent.
    async fn server_config_get(&self, key: &str) -> StorageResult<String>;

    /// Write a value, replacing any previous one.
    async fn server_config_set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Store `value` only if `key` is unset; return whichever value is stored.
    async fn server_config_insert_if_absent(&self, key: &str, value: &str)
        -> StorageResult<String>;

    /// Delete a value. No-op if absent.
    async fn server_config_delete(&self, key: &str) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Visibility scope of a secret or registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Scope {
    /// Single repository, by full name (`owner/name`)
    Repo(String),
    /// Every repository of an owner
    Org(String),
    /// Every repository on the server
    Global,
}

impl Scope {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Scope::Repo(_) => "repo",
            Scope::Org(_) => "org",
            Scope::Global => "global",
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Scope::Repo(name) | Scope::Org(name) => name,
            Scope::Global => "",
        }
    }

    pub(crate) fn from_parts(kind: &str, name: String) -> StorageResult<Self> {
        match kind {
            "repo" => Ok(Scope::Repo(name)),
            "org" => Ok(Scope::Org(name)),
            "global" => Ok(Scope::Global),
            other => Err(StorageError::Serialization(format!(
                "unknown scope kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            other => write!(f, "{}:{}", other.kind(), other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// SecretStore
// ---------------------------------------------------------------------------

/// A named secret injected into pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub value: String,
    /// Images allowed to receive the secret; empty means any.
    #[serde(default)]
    pub images: Vec<String>,
    /// Pipeline events the secret is exposed to; empty means every event.
    #[serde(default)]
    pub events: Vec<String>,
    pub scope: Scope,
}

impl Secret {
    /// Create a new secret available to every event and image.
    pub fn new(scope: Scope, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            images: Vec::new(),
            events: Vec::new(),
            scope,
        }
    }

    /// Restrict the secret to the given events.
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the secret to the given images.
    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = images.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the secret is exposed to a pipeline triggered by `event`.
    pub fn matches_event(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

/// Built-in secret persistence.
///
/// Names are unique within a scope. `secret_list` returns secrets sorted by name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn secret_list(&self, scope: &Scope) -> StorageResult<Vec<Secret>>;

    /// Returns `None` when the scope has no secret with that name.
    async fn secret_find(&self, scope: &Scope, name: &str) -> StorageResult<Option<Secret>>;

    /// Returns `StorageError::AlreadyExists` on a duplicate name.
    async fn secret_create(&self, secret: Secret) -> StorageResult<()>;

    async fn secret_delete(&self, scope: &Scope, name: &str) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// RegistryStore
// ---------------------------------------------------------------------------

/// Credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Registry host, e.g. `docker.io`
    pub address: String,
    pub username: String,
    pub password: String,
    pub scope: Scope,
}

impl Registry {
    pub fn new(
        scope: Scope,
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            scope,
        }
    }
}

/// Built-in registry credential persistence, keyed by address within a scope.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn registry_list(&self, scope: &Scope) -> StorageResult<Vec<Registry>>;

    async fn registry_find(&self, scope: &Scope, address: &str)
        -> StorageResult<Option<Registry>>;

    /// Returns `StorageError::AlreadyExists` on a duplicate address.
    async fn registry_create(&self, registry: Registry) -> StorageResult<()>;

    async fn registry_delete(&self, scope: &Scope, address: &str) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_parts() {
        for scope in [
            Scope::Repo("octo/hello".to_string()),
            Scope::Org("octo".to_string()),
            Scope::Global,
        ] {
            let back = Scope::from_parts(scope.kind(), scope.name().to_string()).unwrap();
            assert_eq!(back, scope);
        }
    }

    #[test]
    fn unknown_scope_kind_is_rejected() {
        let err = Scope::from_parts("team", "x".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn secret_without_events_matches_everything() {
        let secret = Secret::new(Scope::Global, "token", "s3cr3t");
        assert!(secret.matches_event("push"));
        assert!(secret.matches_event("deploy"));

        let secret = secret.with_events(["push", "tag"]);
        assert!(secret.matches_event("tag"));
        assert!(!secret.matches_event("pull"));
    }

    #[test]
    fn scope_display() {
        assert_eq!(Scope::Repo("a/b".into()).to_string(), "repo:a/b");
        assert_eq!(Scope::Global.to_string(), "global");
    }
}
