//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryServerConfigStore`, `MemorySecretStore`, and
//! `MemoryRegistryStore` that satisfy the trait contracts without any
//! external dependencies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryServerConfigStore
// ---------------------------------------------------------------------------

/// In-memory server config backed by a `HashMap<key, value>`.
#[derive(Debug, Default)]
pub struct MemoryServerConfigStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryServerConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerConfigStore for MemoryServerConfigStore {
    async fn server_config_get(&self, key: &str) -> StorageResult<String> {
        let values = self.values.lock().unwrap();
        values
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "server config",
                key: key.to_string(),
            })
    }

    async fn server_config_set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn server_config_insert_if_absent(
        &self,
        key: &str,
        value: &str,
    ) -> StorageResult<String> {
        let mut values = self.values.lock().unwrap();
        Ok(values
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }

    async fn server_config_delete(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.lock().unwrap();
        values.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySecretStore
// ---------------------------------------------------------------------------

/// In-memory secrets backed by `HashMap<Scope, BTreeMap<name, Secret>>`.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<Scope, BTreeMap<String, Secret>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn secret_list(&self, scope: &Scope) -> StorageResult<Vec<Secret>> {
        let secrets = self.secrets.lock().unwrap();
        Ok(secrets
            .get(scope)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn secret_find(&self, scope: &Scope, name: &str) -> StorageResult<Option<Secret>> {
        let secrets = self.secrets.lock().unwrap();
        Ok(secrets.get(scope).and_then(|by_name| by_name.get(name)).cloned())
    }

    async fn secret_create(&self, secret: Secret) -> StorageResult<()> {
        let mut secrets = self.secrets.lock().unwrap();
        let by_name = secrets.entry(secret.scope.clone()).or_default();
        if by_name.contains_key(&secret.name) {
            return Err(StorageError::AlreadyExists {
                kind: "secret",
                key: format!("{}/{}", secret.scope, secret.name),
            });
        }
        by_name.insert(secret.name.clone(), secret);
        Ok(())
    }

    async fn secret_delete(&self, scope: &Scope, name: &str) -> StorageResult<()> {
        let mut secrets = self.secrets.lock().unwrap();
        if let Some(by_name) = secrets.get_mut(scope) {
            by_name.remove(name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistryStore
// ---------------------------------------------------------------------------

/// In-memory registries backed by `HashMap<Scope, BTreeMap<address, Registry>>`.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    registries: Mutex<HashMap<Scope, BTreeMap<String, Registry>>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn registry_list(&self, scope: &Scope) -> StorageResult<Vec<Registry>> {
        let registries = self.registries.lock().unwrap();
        Ok(registries
            .get(scope)
            .map(|by_addr| by_addr.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn registry_find(
        &self,
        scope: &Scope,
        address: &str,
    ) -> StorageResult<Option<Registry>> {
        let registries = self.registries.lock().unwrap();
        Ok(registries
            .get(scope)
            .and_then(|by_addr| by_addr.get(address))
            .cloned())
    }

    async fn registry_create(&self, registry: Registry) -> StorageResult<()> {
        let mut registries = self.registries.lock().unwrap();
        let by_addr = registries.entry(registry.scope.clone()).or_default();
        if by_addr.contains_key(&registry.address) {
            return Err(StorageError::AlreadyExists {
                kind: "registry",
                key: format!("{}/{}", registry.scope, registry.address),
            });
        }
        by_addr.insert(registry.address.clone(), registry);
        Ok(())
    }

    async fn registry_delete(&self, scope: &Scope, address: &str) -> StorageResult<()> {
        let mut registries = self.registries.lock().unwrap();
        if let Some(by_addr) = registries.get_mut(scope) {
            by_addr.remove(address);
        }
        Ok(())
    }
}
