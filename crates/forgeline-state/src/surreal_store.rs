//! SurrealDB-backed store
//!
//! One connection implements all three storage traits. Rows are flat
//! records (`ConfigRow`, `SecretRow`, `RegistryRow`) converted to the
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::storage_traits::{
    Registry, RegistryStore, Scope, Secret, SecretStore, ServerConfigStore, StorageResult,
};

const NAMESPACE: &str = "forgeline";
const DATABASE: &str = "main";

/// Default on-disk location when no URL is configured.
pub const DEFAULT_LOCAL_PATH: &str = ".forgeline/db";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigRow {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretRow {
    scope_kind: String,
    scope_name: String,
    name: String,
    value: String,
    images: Vec<String>,
    events: Vec<String>,
}

impl SecretRow {
    fn from_secret(secret: Secret) -> Self {
        Self {
            scope_kind: secret.scope.kind().to_string(),
            scope_name: secret.scope.name().to_string(),
            name: secret.name,
            value: secret.value,
            images: secret.images,
            events: secret.events,
        }
    }

    fn into_secret(self) -> StorageResult<Secret> {
        Ok(Secret {
            scope: Scope::from_parts(&self.scope_kind, self.scope_name)?,
            name: self.name,
            value: self.value,
            images: self.images,
            events: self.events,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryRow {
    scope_kind: String,
    scope_name: String,
    address: String,
    username: String,
    password: String,
}

impl RegistryRow {
    fn from_registry(registry: Registry) -> Self {
        Self {
            scope_kind: registry.scope.kind().to_string(),
            scope_name: registry.scope.name().to_string(),
            address: registry.address,
            username: registry.username,
            password: registry.password,
        }
    }

    fn into_registry(self) -> StorageResult<Registry> {
        Ok(Registry {
            scope: Scope::from_parts(&self.scope_kind, self.scope_name)?,
            address: self.address,
            username: self.username,
            password: self.password,
        })
    }
}

/// SurrealDB implementation of [`ServerConfigStore`], [`SecretStore`] and
/// [`RegistryStore`].
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB URL (`mem://`, `surrealkv://path`, `ws://host`),
    /// select `forgeline/main`, and run `init_schema`.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        Self::select_and_migrate(db, url).await
    }

    /// Connect to a remote instance as a root user.
    pub async fn connect_root(url: &str, username: &str, password: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.signin(Root { username, password })
            .await
            .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;

        Self::select_and_migrate(db, url).await
    }

    /// Create from environment variables.
    ///
    /// Reads:
    /// - SURREALDB_URL (optional) - remote or embedded URL
    /// - SURREALDB_USERNAME / SURREALDB_PASSWORD (optional) - root credentials
    ///
    /// Falls back to local persistence in `.forgeline/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return match (
                std::env::var("SURREALDB_USERNAME"),
                std::env::var("SURREALDB_PASSWORD"),
            ) {
                (Ok(user), Ok(pass)) => Self::connect_root(&url, &user, &pass).await,
                _ => Self::connect(&url).await,
            };
        }

        std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {DEFAULT_LOCAL_PATH}: {e}"
            ))
        })?;
        let url = format!("surrealkv://{DEFAULT_LOCAL_PATH}");
        info!("No SURREALDB_URL found, using local persistence: {}", url);
        Self::connect(&url).await
    }

    async fn select_and_migrate(db: Surreal<Any>, url: &str) -> crate::Result<Self> {
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealStore connected ({})", url);
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_config(&self, key: &str) -> StorageResult<Option<String>> {
        let mut res = self
            .db
            .query("SELECT key, value FROM server_config WHERE key = $key")
            .bind(("key", key.to_string()))
            .await?;

        let rows: Vec<ConfigRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(|row| row.value))
    }
}

#[async_trait]
impl ServerConfigStore for SurrealStore {
    async fn server_config_get(&self, key: &str) -> StorageResult<String> {
        self.fetch_config(key)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: "server config",
                key: key.to_string(),
            })
    }

    #[instrument(skip(self, value), fields(key = %key))]
    async fn server_config_set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.db
            .query("UPSERT type::thing('server_config', $key) CONTENT { key: $key, value: $value }")
            .bind(("key", key.to_string()))
            .bind(("value", value.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(key = %key))]
    async fn server_config_insert_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> StorageResult<String> {
        let created = self
            .db
            .query("CREATE type::thing('server_config', $key) CONTENT { key: $key, value: $value }")
            .bind(("key", key.to_string()))
            .bind(("value", value.to_string()))
            .await
            .and_then(|res| res.check());

        match created {
            Ok(_) => {
                debug!("server config value created");
                Ok(value.to_string())
            }
            // Lost the race (or the key already existed): adopt the stored value.
            Err(create_err) => match self.fetch_config(key).await? {
                Some(existing) => {
                    debug!("server config value already present");
                    Ok(existing)
                }
                None => Err(StorageError::Backend(create_err.to_string())),
            },
        }
    }

    async fn server_config_delete(&self, key: &str) -> StorageResult<()> {
        self.db
            .query("DELETE type::thing('server_config', $key)")
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for SurrealStore {
    async fn secret_list(&self, scope: &Scope) -> StorageResult<Vec<Secret>> {
        let mut res = self
            .db
            .query(
                "SELECT scope_kind, scope_name, name, value, images, events FROM secrets \
                 WHERE scope_kind = $kind AND scope_name = $scope ORDER BY name",
            )
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .await?;

        let rows: Vec<SecretRow> = res.take(0)?;
        rows.into_iter().map(SecretRow::into_secret).collect()
    }

    async fn secret_find(&self, scope: &Scope, name: &str) -> StorageResult<Option<Secret>> {
        let mut res = self
            .db
            .query(
                "SELECT scope_kind, scope_name, name, value, images, events FROM secrets \
                 WHERE scope_kind = $kind AND scope_name = $scope AND name = $name",
            )
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .bind(("name", name.to_string()))
            .await?;

        let rows: Vec<SecretRow> = res.take(0)?;
        rows.into_iter().next().map(SecretRow::into_secret).transpose()
    }

    #[instrument(skip(self, secret), fields(scope = %secret.scope, name = %secret.name))]
    async fn secret_create(&self, secret: Secret) -> StorageResult<()> {
        if self.secret_find(&secret.scope, &secret.name).await?.is_some() {
            return Err(StorageError::AlreadyExists {
                kind: "secret",
                key: format!("{}/{}", secret.scope, secret.name),
            });
        }

        self.db
            .query("CREATE secrets CONTENT $row")
            .bind(("row", SecretRow::from_secret(secret)))
            .await?
            .check()?;
        Ok(())
    }

    async fn secret_delete(&self, scope: &Scope, name: &str) -> StorageResult<()> {
        self.db
            .query("DELETE secrets WHERE scope_kind = $kind AND scope_name = $scope AND name = $name")
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for SurrealStore {
    async fn registry_list(&self, scope: &Scope) -> StorageResult<Vec<Registry>> {
        let mut res = self
            .db
            .query(
                "SELECT scope_kind, scope_name, address, username, password FROM registries \
                 WHERE scope_kind = $kind AND scope_name = $scope ORDER BY address",
            )
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .await?;

        let rows: Vec<RegistryRow> = res.take(0)?;
        rows.into_iter().map(RegistryRow::into_registry).collect()
    }

    async fn registry_find(
        &self,
        scope: &Scope,
        address: &str,
    ) -> StorageResult<Option<Registry>> {
        let mut res = self
            .db
            .query(
                "SELECT scope_kind, scope_name, address, username, password FROM registries \
                 WHERE scope_kind = $kind AND scope_name = $scope AND address = $address",
            )
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .bind(("address", address.to_string()))
            .await?;

        let rows: Vec<RegistryRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(RegistryRow::into_registry)
            .transpose()
    }

    #[instrument(skip(self, registry), fields(scope = %registry.scope, address = %registry.address))]
    async fn registry_create(&self, registry: Registry) -> StorageResult<()> {
        if self
            .registry_find(&registry.scope, &registry.address)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists {
                kind: "registry",
                key: format!("{}/{}", registry.scope, registry.address),
            });
        }

        self.db
            .query("CREATE registries CONTENT $row")
            .bind(("row", RegistryRow::from_registry(registry)))
            .await?
            .check()?;
        Ok(())
    }

    async fn registry_delete(&self, scope: &Scope, address: &str) -> StorageResult<()> {
        self.db
            .query(
                "DELETE registries WHERE scope_kind = $kind AND scope_name = $scope \
                 AND address = $address",
            )
            .bind(("kind", scope.kind().to_string()))
            .bind(("scope", scope.name().to_string()))
            .bind(("address", address.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}
